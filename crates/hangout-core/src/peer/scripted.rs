//! Scripted in-process transport
//!
//! [`ScriptedConnector`] hands out [`ScriptedTransport`]s that record every
//! call, fail on request, and fire transport callbacks only when told to.
//! Tests and single-process demos use it in place of a network stack.

use super::transport::{
    Connector, ConnectionParams, DescriptionOptions, IceCandidate, IceGatheringState, Transport,
    TransportEvent, TransportEventHandler,
};
use crate::error::{Error, Result};
use crate::media::MediaStream;
use crate::sdp::{SessionDescription, CRLF};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Browser-like audio description: CN listed before Opus
pub const TEMPLATE_SDP: &str = "v=0\r\n\
o=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
a=group:BUNDLE 0\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 103 111 0 8 126\r\n\
c=IN IP4 0.0.0.0\r\n\
a=rtcp:9 IN IP4 0.0.0.0\r\n\
a=ice-ufrag:hU7r\r\n\
a=ice-pwd:4b2Hq1sYxfj9Yc0Dv8Zk1Pqw\r\n\
a=fingerprint:sha-256 6B:8B:F0:65:5F:78:E2:51:3B:AC:6F:F3:3F:46:1B:35:DC:B8:5F:64:1A:24:C2:43:F0:A1:58:D0:A1:2C:19:08\r\n\
a=setup:actpass\r\n\
a=mid:0\r\n\
a=sendrecv\r\n\
a=rtcp-mux\r\n\
a=rtpmap:103 CN/8000\r\n\
a=rtpmap:111 opus/48000/2\r\n\
a=fmtp:111 minptime=10;useinbandfec=1\r\n\
a=rtpmap:0 PCMU/8000\r\n\
a=rtpmap:8 PCMA/8000\r\n\
a=rtpmap:126 telephone-event/8000\r\n";

/// Transport operation that can be told to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptedStep {
    /// `create_offer`
    CreateOffer,
    /// `create_answer`
    CreateAnswer,
    /// `set_local_description`
    SetLocal,
    /// `set_remote_description`
    SetRemote,
    /// `add_ice_candidate`
    AddCandidate,
    /// `add_stream`
    AddStream,
}

impl ScriptedStep {
    fn operation(self) -> &'static str {
        match self {
            ScriptedStep::CreateOffer => "create_offer",
            ScriptedStep::CreateAnswer => "create_answer",
            ScriptedStep::SetLocal => "set_local_description",
            ScriptedStep::SetRemote => "set_remote_description",
            ScriptedStep::AddCandidate => "add_ice_candidate",
            ScriptedStep::AddStream => "add_stream",
        }
    }
}

/// Recorded transport call
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    CreateOffer(DescriptionOptions),
    CreateAnswer(DescriptionOptions),
    SetLocal(SessionDescription),
    SetRemote(SessionDescription),
    AddCandidate(IceCandidate),
    AddStream(String),
    Close,
}

/// Connector producing scripted transports
#[derive(Default)]
pub struct ScriptedConnector {
    unavailable: Option<String>,
    failures: HashSet<ScriptedStep>,
    auto_gather: Option<Vec<IceCandidate>>,
    template: Option<String>,
    transports: Mutex<Vec<Arc<ScriptedTransport>>>,
}

impl ScriptedConnector {
    /// Connector whose transports succeed and never gather on their own
    pub fn new() -> Self {
        Self::default()
    }

    /// Every allocation fails with `TransportUnavailable`
    pub fn unavailable(mut self, reason: impl Into<String>) -> Self {
        self.unavailable = Some(reason.into());
        self
    }

    /// Fail `step` with a negotiation error
    pub fn fail(mut self, step: ScriptedStep) -> Self {
        self.failures.insert(step);
        self
    }

    /// After the local description is set, gather `candidates` then finish
    pub fn auto_gather(mut self, candidates: Vec<IceCandidate>) -> Self {
        self.auto_gather = Some(candidates);
        self
    }

    /// SDP returned by offers and answers
    pub fn with_template(mut self, sdp: impl Into<String>) -> Self {
        self.template = Some(sdp.into());
        self
    }

    /// Transports allocated so far
    pub fn transports(&self) -> Vec<Arc<ScriptedTransport>> {
        self.transports.lock().clone()
    }

    /// Most recently allocated transport
    pub fn last(&self) -> Option<Arc<ScriptedTransport>> {
        self.transports.lock().last().cloned()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(
        &self,
        params: ConnectionParams,
        handler: TransportEventHandler,
    ) -> Result<Arc<dyn Transport>> {
        if let Some(reason) = &self.unavailable {
            return Err(Error::transport_unavailable(reason.clone()));
        }
        let transport = Arc::new_cyclic(|this| ScriptedTransport {
            this: this.clone(),
            params,
            handler,
            failures: self.failures.clone(),
            auto_gather: self.auto_gather.clone(),
            template: self
                .template
                .clone()
                .unwrap_or_else(|| TEMPLATE_SDP.to_string()),
            state: Mutex::new(ScriptedState::default()),
        });
        self.transports.lock().push(transport.clone());
        Ok(transport)
    }
}

#[derive(Default)]
struct ScriptedState {
    calls: Vec<TransportCall>,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    closed: bool,
}

/// Transport driven by the test
pub struct ScriptedTransport {
    this: Weak<ScriptedTransport>,
    params: ConnectionParams,
    handler: TransportEventHandler,
    failures: HashSet<ScriptedStep>,
    auto_gather: Option<Vec<IceCandidate>>,
    template: String,
    state: Mutex<ScriptedState>,
}

impl ScriptedTransport {
    /// Parameters the transport was allocated with
    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    /// Calls made so far
    pub fn calls(&self) -> Vec<TransportCall> {
        self.state.lock().calls.clone()
    }

    /// Applied local description
    pub fn local(&self) -> Option<SessionDescription> {
        self.state.lock().local.clone()
    }

    /// Applied remote description
    pub fn remote(&self) -> Option<SessionDescription> {
        self.state.lock().remote.clone()
    }

    /// Remote candidates added so far
    pub fn remote_candidates(&self) -> Vec<IceCandidate> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                TransportCall::AddCandidate(candidate) => Some(candidate.clone()),
                _ => None,
            })
            .collect()
    }

    /// Whether `close` was called
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Fire a raw transport callback
    pub fn fire(&self, event: TransportEvent) {
        (self.handler)(event);
    }

    /// Report gathered candidates, bundling them into the local description,
    /// then report the end of candidates
    pub fn gather(&self, candidates: Vec<IceCandidate>) {
        self.fire(TransportEvent::IceGatheringStateChange(
            IceGatheringState::Gathering,
        ));
        for candidate in candidates {
            {
                let mut state = self.state.lock();
                if let Some(local) = state.local.as_mut() {
                    if !local.sdp.is_empty() && !local.sdp.ends_with(CRLF) {
                        local.sdp.push_str(CRLF);
                    }
                    local.sdp.push_str(&candidate.to_sdp_line());
                    local.sdp.push_str(CRLF);
                }
            }
            self.fire(TransportEvent::IceCandidate(Some(candidate)));
        }
        self.fire(TransportEvent::IceCandidate(None));
    }

    /// Report gathering complete without an end-of-candidates marker
    pub fn complete_gathering(&self) {
        self.fire(TransportEvent::IceGatheringStateChange(
            IceGatheringState::Complete,
        ));
    }

    fn record(&self, call: TransportCall) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::negotiation("transport", "transport is closed"));
        }
        state.calls.push(call);
        Ok(())
    }

    fn check(&self, step: ScriptedStep) -> Result<()> {
        if self.failures.contains(&step) {
            return Err(Error::negotiation(step.operation(), "scripted failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn create_offer(&self, options: &DescriptionOptions) -> Result<SessionDescription> {
        self.record(TransportCall::CreateOffer(options.clone()))?;
        self.check(ScriptedStep::CreateOffer)?;
        Ok(SessionDescription::offer(self.template.clone()))
    }

    async fn create_answer(&self, options: &DescriptionOptions) -> Result<SessionDescription> {
        self.record(TransportCall::CreateAnswer(options.clone()))?;
        self.check(ScriptedStep::CreateAnswer)?;
        if self.state.lock().remote.is_none() {
            return Err(Error::negotiation(
                ScriptedStep::CreateAnswer.operation(),
                "no remote description",
            ));
        }
        Ok(SessionDescription::answer(self.template.clone()))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.record(TransportCall::SetLocal(description.clone()))?;
        self.check(ScriptedStep::SetLocal)?;
        self.state.lock().local = Some(description);

        if let Some(candidates) = self.auto_gather.clone() {
            let this = self.this.clone();
            tokio::spawn(async move {
                if let Some(transport) = this.upgrade() {
                    debug!(count = candidates.len(), "scripted gathering");
                    transport.gather(candidates);
                    transport.complete_gathering();
                }
            });
        }
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.record(TransportCall::SetRemote(description.clone()))?;
        self.check(ScriptedStep::SetRemote)?;
        self.state.lock().remote = Some(description);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.record(TransportCall::AddCandidate(candidate))?;
        self.check(ScriptedStep::AddCandidate)
    }

    async fn add_stream(&self, stream: &MediaStream) -> Result<()> {
        self.record(TransportCall::AddStream(stream.id.clone()))?;
        self.check(ScriptedStep::AddStream)
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.state.lock().local.clone()
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(TransportCall::Close);
        state.closed = true;
        Ok(())
    }
}
