use std::{thread::sleep, time::Duration};

use hastur::{labels, HasturBuilder, Interval, Map, Value};
use metrics::{counter, histogram};
use rand::Rng;

fn main() {
    tracing_subscriber::fmt::init();

    let client = HasturBuilder::default()
        .with_udp_port(8125)
        .with_app_name("hastur.worker")
        .with_default_labels(labels!("env" => "dev"))
        .install()
        .expect("failed to install Hastur client");

    client.start().expect("failed to start heartbeat");

    let mut info = Map::new();
    info.insert("threads".to_string(), Value::from(1));
    client.info_process("startup", info);

    let reporter = client.clone();
    let _schedule = client
        .every(Interval::FiveSecs, move || reporter.mark("worker.state", "green"))
        .expect("failed to schedule state report");

    let mut rng = rand::rng();

    // Loop over and over, pretending to do some work.
    loop {
        let work = client.time("worker.iteration", || {
            let millis = rng.random_range(10..250);
            sleep(Duration::from_millis(millis));
            millis
        });

        counter!("worker.iterations").increment(1);
        histogram!("worker.work_ms").record(work as f64);

        if work > 240 {
            client.log("slow iteration", labels!("millis" => work));
        }
    }
}
