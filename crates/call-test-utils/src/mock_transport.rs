//! Mock media transport.
//!
//! Connect results are scripted per URL; unscripted URLs connect. After a
//! successful connect the test drives the session by pushing
//! [`TransportEvent`]s through [`MockTransport::emit`].
//!
//! # Example
//!
//! ```rust,ignore
//! use call_test_utils::MockTransport;
//!
//! let transport = MockTransport::builder()
//!     .fail("https://a.example.com", TransportError::Timeout)
//!     .build();
//!
//! // connect to ["https://a.example.com", "https://b.example.com"]...
//! assert_eq!(transport.attempts(), vec!["https://a.example.com", "https://b.example.com"]);
//! transport.emit(TransportEvent::Reconnecting).await;
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use call_engine::ports::{ConnectRequest, MediaTransport, TransportError, TransportEvent};
use signaling_protocol::Topic;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

/// A data packet the session published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedPacket {
    pub topic: Topic,
    pub payload: Bytes,
    pub targets: Option<Vec<String>>,
}

#[derive(Default)]
struct State {
    scripted: HashMap<String, VecDeque<Result<(), TransportError>>>,
    attempts: Vec<String>,
    requests: Vec<ConnectRequest>,
    events: Option<mpsc::Sender<TransportEvent>>,
    disconnects: usize,
    published: Vec<PublishedPacket>,
    microphone: Option<bool>,
    camera: Option<bool>,
}

/// Scriptable [`MediaTransport`].
pub struct MockTransport {
    state: Mutex<State>,
    connect_delay: Duration,
    publish_error: Option<TransportError>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl MockTransport {
    /// Create a new `MockTransport` builder.
    #[must_use]
    pub fn builder() -> MockTransportBuilder {
        MockTransportBuilder::default()
    }

    /// Push a transport event to the current connection.
    ///
    /// Returns `false` when there is no connection or the session stopped
    /// listening.
    pub async fn emit(&self, event: TransportEvent) -> bool {
        let sender = self.state.lock().unwrap().events.clone();
        match sender {
            Some(sender) => sender.send(event).await.is_ok(),
            None => false,
        }
    }

    /// URLs passed to `connect`, in call order.
    #[must_use]
    pub fn attempts(&self) -> Vec<String> {
        self.state.lock().unwrap().attempts.clone()
    }

    /// Requests passed to `connect`, in call order.
    #[must_use]
    pub fn requests(&self) -> Vec<ConnectRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    #[must_use]
    pub fn disconnect_count(&self) -> usize {
        self.state.lock().unwrap().disconnects
    }

    /// Packets published so far.
    #[must_use]
    pub fn published(&self) -> Vec<PublishedPacket> {
        self.state.lock().unwrap().published.clone()
    }

    /// Packets published on `topic`.
    #[must_use]
    pub fn published_on(&self, topic: Topic) -> Vec<PublishedPacket> {
        self.published()
            .into_iter()
            .filter(|p| p.topic == topic)
            .collect()
    }

    /// Last microphone state requested by the session.
    #[must_use]
    pub fn microphone(&self) -> Option<bool> {
        self.state.lock().unwrap().microphone
    }

    /// Last camera state requested by the session.
    #[must_use]
    pub fn camera(&self) -> Option<bool> {
        self.state.lock().unwrap().camera
    }
}

#[async_trait]
impl MediaTransport for MockTransport {
    async fn connect(
        &self,
        url: &str,
        request: &ConnectRequest,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<(), TransportError> {
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }

        let mut state = self.state.lock().unwrap();
        state.attempts.push(url.to_string());
        state.requests.push(request.clone());
        let result = state
            .scripted
            .get_mut(url)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Ok(()));
        if result.is_ok() {
            state.events = Some(events);
        }
        result
    }

    async fn disconnect(&self) {
        let mut state = self.state.lock().unwrap();
        state.disconnects += 1;
        state.events = None;
    }

    async fn publish_data(
        &self,
        payload: Bytes,
        topic: Topic,
        targets: Option<Vec<String>>,
    ) -> Result<(), TransportError> {
        if let Some(error) = &self.publish_error {
            return Err(error.clone());
        }
        self.state.lock().unwrap().published.push(PublishedPacket {
            topic,
            payload,
            targets,
        });
        Ok(())
    }

    async fn set_microphone_enabled(&self, enabled: bool) -> Result<(), TransportError> {
        self.state.lock().unwrap().microphone = Some(enabled);
        Ok(())
    }

    async fn set_camera_enabled(&self, enabled: bool) -> Result<(), TransportError> {
        self.state.lock().unwrap().camera = Some(enabled);
        Ok(())
    }
}

/// Builder for [`MockTransport`].
#[derive(Default)]
pub struct MockTransportBuilder {
    scripted: HashMap<String, VecDeque<Result<(), TransportError>>>,
    connect_delay: Duration,
    publish_error: Option<TransportError>,
}

impl MockTransportBuilder {
    /// Fail the next connect to `url` with `error`. Repeatable; failures are
    /// consumed in order, after which `url` connects.
    #[must_use]
    pub fn fail(mut self, url: impl Into<String>, error: TransportError) -> Self {
        self.scripted
            .entry(url.into())
            .or_default()
            .push_back(Err(error));
        self
    }

    /// Delay every connect by `delay` (virtual time under a paused clock).
    #[must_use]
    pub fn connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Fail every publish with `error`.
    #[must_use]
    pub fn publish_error(mut self, error: TransportError) -> Self {
        self.publish_error = Some(error);
        self
    }

    #[must_use]
    pub fn build(self) -> MockTransport {
        MockTransport {
            state: Mutex::new(State {
                scripted: self.scripted,
                ..State::default()
            }),
            connect_delay: self.connect_delay,
            publish_error: self.publish_error,
        }
    }
}
