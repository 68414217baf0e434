use std::sync::Arc;

use courier_mq::{config::StoreConfig, consumer::Consumer, store::Store};

/// Publishes a batch of events and drains them back through an
/// auto-committing consumer. Storage calls block, so everything runs on
/// the blocking pool.
#[tokio::main]
async fn main() {
    env_logger::init();

    let mut config = StoreConfig::new("./demo-data");
    config.consumer.auto_commit = true;

    let consumer = Consumer::new("demo_client", "events", config.consumer);

    let store = Arc::new(Store::open(config).unwrap());

    {
        let store = store.clone();
        let subscriber = consumer.clone();
        tokio::task::spawn_blocking(move || {
            store.add_consumer(subscriber).unwrap();

            for i in 0..10 {
                let offset = store.append("events", format!("event_{}", i).as_bytes()).unwrap();
                println!("published event_{} at offset {}", i, offset);
            }
        })
        .await
        .unwrap();
    }

    let store_reader = store.clone();
    tokio::task::spawn_blocking(move || loop {
        match store_reader.read(&consumer) {
            Ok(payload) => println!("consumed {:?}", payload),
            Err(error) if error.is_end_of_stream() => break,
            Err(error) => panic!("read failed: {:?}", error),
        }
    })
    .await
    .unwrap();

    let store = Arc::try_unwrap(store).ok().expect("store still in use");
    store.close().unwrap();
}
