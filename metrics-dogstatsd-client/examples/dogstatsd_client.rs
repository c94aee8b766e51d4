use std::time::Duration;

use metrics::{counter, histogram};
use metrics_dogstatsd_client::{DogStatsDBuilder, Event, ServiceCheck, ServiceCheckStatus};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;

fn main() {
    tracing_subscriber::fmt::init();

    let recorder = DogStatsDBuilder::default()
        .with_remote_address("localhost:9125")
        .expect("failed to parse remote address")
        .with_namespace("example.")
        .with_global_tags(["env:dev"])
        .with_extended_aggregation(true)
        .with_max_samples_per_context(128)
        .build()
        .expect("failed to build DogStatsD recorder");
    let client = recorder.client().clone();
    metrics::set_global_recorder(recorder).expect("failed to install DogStatsD recorder");

    client.event(Event::new("example started", "sending fake work")).expect("failed to send event");

    let mut rng = Xoshiro256StarStar::from_rng(&mut rand::rng());

    // Loop over and over, pretending to do some work.
    for i in 0u64.. {
        counter!("server_loops", "system" => "foo").increment(1);
        histogram!("server_loop_delta_secs", "system" => "foo").record(rng.random_range(0.0..1.0));
        client
            .timing("work", Duration::from_micros(rng.random_range(100..5000)), &["system:foo"], 1.0)
            .expect("failed to send timing");

        if i % 10_000 == 0 {
            client
                .service_check(ServiceCheck::new("example.up", ServiceCheckStatus::Ok))
                .expect("failed to send service check");
            tracing::info!(telemetry = ?client.telemetry(), "Client telemetry.");
        }

        std::thread::sleep(Duration::from_micros(50));
    }
}
