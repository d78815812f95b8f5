use std::{net::SocketAddr, sync::atomic::AtomicBool};

use singleshot_common::EndpointConfig;
use uuid::Uuid;

use crate::{
    error::{CertificateDecodeError, EndpointError, ShutdownError, TransportError},
    exchange::{self, Exchange},
    identity::{self, PeerIdentity},
    listener::{RawChannel, TransportListener},
    negotiator::TlsContext,
    session::SessionState,
    shutdown::CloseOutcome,
};

type Observer = Box<dyn FnMut(SessionState) + Send>;

/// Everything observable about one completed session
#[derive(Debug)]
pub struct SessionReport {
    pub session_id:       Uuid,
    pub peer_addr:        SocketAddr,
    pub cipher_suite:     String,
    pub protocol_version: String,
    pub peer_identity:    Result<Option<PeerIdentity>, CertificateDecodeError>,
    pub exchange:         Exchange,
    pub close:            Result<CloseOutcome, ShutdownError>,
}

/// A single-connection TLS endpoint in the `UNBOUND` state.
///
/// Credentials are loaded and the TLS context is built when the endpoint is
/// created, so configuration defects surface before any socket exists.
pub struct Endpoint {
    config:   EndpointConfig,
    context:  TlsContext,
    observer: Option<Observer>,
}

impl Endpoint {
    pub fn new(config: EndpointConfig) -> Result<Self, EndpointError> {
        let context = TlsContext::from_config(&config)?;
        Ok(Self::with_context(config, context))
    }

    /// Uses a prepared TLS context instead of loading from the config paths
    pub fn with_context(config: EndpointConfig, context: TlsContext) -> Self {
        let context = context.with_close_linger(config.close_linger());
        Self {
            config,
            context,
            observer: None,
        }
    }

    /// Called with every state the session enters
    pub fn on_transition(mut self, observer: impl FnMut(SessionState) + Send + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// `UNBOUND -> LISTENING`
    pub fn bind(mut self) -> Result<ListeningEndpoint, EndpointError> {
        let listener = match TransportListener::bind(self.config.socket_addr()) {
            Ok(listener) => listener,
            Err(e) => {
                notify(&mut self.observer, SessionState::Failed);
                return Err(e.into());
            }
        };
        notify(&mut self.observer, SessionState::Listening);

        Ok(ListeningEndpoint {
            config: self.config,
            context: self.context,
            observer: self.observer,
            listener,
        })
    }

    /// Binds, serves one session and closes it
    pub fn run(self) -> Result<SessionReport, EndpointError> {
        self.bind()?.serve()
    }
}

/// An endpoint whose listener is bound and waiting for its one connection
pub struct ListeningEndpoint {
    config:   EndpointConfig,
    context:  TlsContext,
    observer: Option<Observer>,
    listener: TransportListener,
}

impl ListeningEndpoint {
    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Accepts one connection (blocking) and runs the session on it
    pub fn serve(self) -> Result<SessionReport, EndpointError> {
        let timeout = self.config.accept_timeout();
        match timeout {
            Some(_) => self.serve_until(&AtomicBool::new(true)),
            None => {
                let Self {
                    config,
                    context,
                    mut observer,
                    listener,
                } = self;
                let accepted = listener.accept();
                run_session(&config, &context, &mut observer, accepted)
            }
        }
    }

    /// Like [`ListeningEndpoint::serve`], but stops waiting for a connection
    /// once `running` is cleared or the accept timeout passes
    pub fn serve_until(self, running: &AtomicBool) -> Result<SessionReport, EndpointError> {
        let Self {
            config,
            context,
            mut observer,
            listener,
        } = self;
        let accepted = listener.accept_until(running, config.accept_timeout());
        run_session(&config, &context, &mut observer, accepted)
    }
}

fn notify(observer: &mut Option<Observer>, state: SessionState) {
    tracing::debug!("Session state: {}", state);
    if let Some(observer) = observer.as_mut() {
        observer(state);
    }
}

fn run_session(
    config: &EndpointConfig,
    context: &TlsContext,
    observer: &mut Option<Observer>,
    accepted: Result<RawChannel, TransportError>,
) -> Result<SessionReport, EndpointError> {
    // LISTENING -> ACCEPTED
    let channel = match accepted {
        Ok(channel) => channel,
        Err(e) => {
            notify(observer, SessionState::Failed);
            return Err(e.into());
        }
    };
    notify(observer, SessionState::Accepted);

    let session_id = Uuid::new_v4();
    let span = tracing::info_span!("session", id = %session_id, peer = %channel.peer_addr());
    let _entered = span.enter();

    if let Err(e) = channel.set_io_timeout(config.io_timeout()) {
        channel.release();
        notify(observer, SessionState::Failed);
        return Err(e.into());
    }

    // ACCEPTED -> HANDSHAKING -> ESTABLISHED
    notify(observer, SessionState::Handshaking);
    let mut session = match context.negotiate(channel, session_id) {
        Ok(session) => session,
        Err(e) => {
            notify(observer, SessionState::Failed);
            return Err(e.into());
        }
    };
    notify(observer, SessionState::Established);

    let peer_identity = identity::extract(&session);
    if let Err(e) = &peer_identity {
        tracing::warn!("Could not decode peer certificate: {}", e);
    }

    let exchanged = exchange::exchange_session(&mut session, &config.reply);

    // ESTABLISHED -> CLOSED, whatever the exchange did
    let close = session.close();
    notify(observer, SessionState::Closed);

    match exchanged {
        Ok(exchange) => Ok(SessionReport {
            session_id,
            peer_addr: session.peer_addr(),
            cipher_suite: session.cipher_suite().to_string(),
            protocol_version: session.protocol_version().to_string(),
            peer_identity,
            exchange,
            close,
        }),
        Err(e) => {
            tracing::error!("Data exchange failed: {}", e);
            Err(e.into())
        }
    }
}
