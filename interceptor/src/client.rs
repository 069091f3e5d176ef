use crate::messages::{PageMessage, SubscribeResult, WorkerMessage};
use crate::push::PushError;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

/// How long a page waits for the worker to answer a subscribe request.
pub const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(5);

/// One page's connection to the worker.
///
/// Replies to this page's messages and worker-wide notices arrive on
/// [`WorkerClient::messages`]; other pages never see this page's replies.
#[derive(Clone, Debug)]
pub struct WorkerClient {
    id: Uuid,
    outbox: mpsc::Sender<PageMessage>,
    inbox: broadcast::Sender<WorkerMessage>,
}

impl WorkerClient {
    pub(crate) fn new(outbox: mpsc::Sender<PageMessage>, inbox: broadcast::Sender<WorkerMessage>) -> Self {
        Self {
            id: Uuid::new_v4(),
            outbox,
            inbox,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn post(&self, message: PageMessage) -> Result<(), PushError> {
        self.outbox
            .send(message)
            .await
            .map_err(|_| PushError::WorkerUnavailable)
    }

    /// Subscribe before posting, or a fast reply can be missed.
    pub fn messages(&self) -> broadcast::Receiver<WorkerMessage> {
        self.inbox.subscribe()
    }

    /// Ask the worker to register for push and wait for the reply that
    /// carries this request's id.
    pub async fn request_subscribe(&self, application_server_key: &str) -> Result<SubscribeResult, PushError> {
        let req_id = Uuid::new_v4().to_string();
        let mut replies = self.messages();
        self.post(PageMessage::Subscribe {
            application_server_key: application_server_key.to_string(),
            req_id: Some(req_id.clone()),
        })
        .await?;

        let wait = async {
            loop {
                match replies.recv().await {
                    Ok(WorkerMessage::SubscribeResult(result))
                        if result.req_id.as_deref() == Some(req_id.as_str()) =>
                    {
                        return Ok(result);
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return Err(PushError::WorkerUnavailable),
                }
            }
        };
        tokio::time::timeout(SUBSCRIBE_TIMEOUT, wait)
            .await
            .map_err(|_| PushError::WorkerTimeout)?
    }
}
