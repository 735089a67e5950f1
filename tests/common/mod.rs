#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use franz::{
    AppState, Broker, Delivery, DeliveryMode, OutgoingMessage, Param, PendingDelivery, ProducerConfig, Result,
    Service, Store, handlers,
};

/// Broker that records every message and acknowledges it.
#[derive(Default)]
pub struct RecordingBroker {
    pub sent: Mutex<Vec<OutgoingMessage>>,
}

impl RecordingBroker {
    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Broker for RecordingBroker {
    fn enqueue(&self, message: OutgoingMessage) -> PendingDelivery {
        let mut sent = self.sent.lock().unwrap();
        sent.push(message);
        let delivery = Delivery { partition: 0, offset: sent.len() as i64 - 1 };
        Box::pin(async move { Ok(delivery) })
    }

    async fn close(&self, _timeout: Duration) -> Result<()> {
        Ok(())
    }
}

/// Store that records statements and their parameters.
#[derive(Default)]
pub struct RecordingStore {
    pub executed: Mutex<Vec<(String, Vec<Param>)>>,
}

impl RecordingStore {
    pub fn executed(&self) -> Vec<(String, Vec<Param>)> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Store for RecordingStore {
    async fn execute(&self, statement: &str, params: &[Param]) -> Result<u64> {
        self.executed.lock().unwrap().push((statement.to_owned(), params.to_vec()));
        Ok(1)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

pub struct App {
    pub service: Service,
    pub state: AppState,
    pub broker: Arc<RecordingBroker>,
    pub store: Arc<RecordingStore>,
}

/// Full route table over recording collaborators, synchronous delivery.
pub fn app() -> App {
    app_with_mode(DeliveryMode::Sync)
}

pub fn app_with_mode(mode: DeliveryMode) -> App {
    let broker = Arc::new(RecordingBroker::default());
    let store = Arc::new(RecordingStore::default());
    let producer = ProducerConfig::new(["localhost:9094"])
        .unwrap()
        .with_mode(mode)
        .build_with(broker.clone());

    let state = AppState {
        producer: Arc::new(producer),
        store: store.clone(),
        emitter: None,
        chat_topic: "chat".into(),
    };

    let mut service = Service::new().with_request_timeout(Duration::from_secs(2));
    handlers::register(&mut service, state.clone()).unwrap();

    App { service, state, broker, store }
}
