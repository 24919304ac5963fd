//! The creation broker and its router-facing service loop
//!
//! [`CreationBroker`] is the request/response state machine: it decides,
//! for each inbound PDU, whether to forward, reply, NAK or drop.
//! [`BrokerService`] owns the network side: a reconnecting TCP client to
//! the routing layer, periodic address advertisement, one worker task
//! per inbound PDU, and a single writer draining all outbound PDUs so
//! the connection never sees interleaved writes.

use futures::{SinkExt, StreamExt};
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::address::Address;
use crate::command::{
    ACK_MIN, CMD_CREATE, CommandPayload, NAK_C_BADREQ, NAK_C_CONFLICT, NAK_R_MAX, NAK_R_MIN,
    NAK_S_INTERNAL, NAK_S_NOTIMPL,
};
use crate::dedup::DedupStore;
use crate::directory::NameDirectory;
use crate::error::{BrokerError, BrokerResult};
use crate::pdu::{Pdu, PduCodec};

/// Human-readable name the service itself is addressed by
pub const SERVICE_NAME: &str = "logcreationservice";

/// Default routing-layer host
pub const DEFAULT_ROUTER_HOST: &str = "172.30.0.1";

/// Default routing-layer port
pub const DEFAULT_ROUTER_PORT: u16 = 8007;

/// Broker service configuration
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// `host:port` of the routing layer to connect to
    pub router_addr: String,
    /// Address the service itself answers on
    pub service_addr: Address,
    /// Additional addresses advertised on behalf of this service
    pub addrs: Vec<Address>,
    /// How often advertisements (doubling as keep-alives) are re-sent
    pub advertise_interval: Duration,
    /// Delay between reconnection attempts to the routing layer
    pub reconnect_delay: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            router_addr: format!("{DEFAULT_ROUTER_HOST}:{DEFAULT_ROUTER_PORT}"),
            service_addr: Address::from_human_name(SERVICE_NAME),
            addrs: Vec::new(),
            advertise_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_millis(500),
        }
    }
}

/// Deduplicating request router for log creation
pub struct CreationBroker {
    store: DedupStore,
    directory: Option<NameDirectory>,
    log_servers: Vec<Address>,
}

impl CreationBroker {
    /// Create a broker over an admission store, an optional name
    /// directory and the set of backend log servers
    pub fn new(
        store: DedupStore,
        directory: Option<NameDirectory>,
        log_servers: Vec<Address>,
    ) -> Self {
        Self {
            store,
            directory,
            log_servers,
        }
    }

    /// Process one inbound PDU and produce the outbound PDU, if any.
    ///
    /// Commands from clients are admitted and forwarded to a backend;
    /// responses from backends are spliced back to the original
    /// creator. Every error category maps to a NAK with a specific
    /// reason code; nothing here panics on bad input.
    pub async fn route_request(&self, pdu: &Pdu) -> Option<Pdu> {
        let payload = match CommandPayload::decode(&pdu.data) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(src = %pdu.src, %e, "undecodable command payload");
                return None;
            }
        };

        // The routing layer telling us something is usually not a good
        // sign; report it and move on.
        if (NAK_R_MIN..=NAK_R_MAX).contains(&payload.cmd) {
            warn!(src = %pdu.src, cmd = payload.cmd, "routing error");
            return None;
        }

        if payload.cmd < ACK_MIN {
            self.route_command(pdu, payload).await
        } else {
            self.route_response(pdu, payload).await
        }
    }

    /// Handle a command PDU (a create request from a client)
    async fn route_command(&self, pdu: &Pdu, payload: CommandPayload) -> Option<Pdu> {
        // A server should only ever send responses
        if self.log_servers.contains(&pdu.src) {
            warn!(cmd = payload.cmd, src = %pdu.src, "received command from a log server");
            return Some(Self::nak(pdu, &payload, NAK_C_BADREQ));
        }

        if payload.cmd != CMD_CREATE {
            warn!(cmd = payload.cmd, "received unknown request");
            return Some(Self::nak(pdu, &payload, NAK_S_NOTIMPL));
        }

        let (human_name, logname) = payload.extract_name();

        if let (Some(human_name), Some(directory)) = (&human_name, &self.directory) {
            match directory.record(human_name, &logname).await {
                Ok(()) => {}
                Err(BrokerError::Conflict) => {
                    warn!(human_name, "could not add mapping; name already taken");
                    return Some(Self::nak(pdu, &payload, NAK_C_CONFLICT));
                }
                Err(BrokerError::PoolExhausted) => {
                    warn!("directory connection pool exhausted");
                    return Some(Self::nak(pdu, &payload, NAK_S_INTERNAL));
                }
                Err(e) => {
                    warn!(%e, "directory insert failed");
                    return Some(Self::nak(pdu, &payload, NAK_S_INTERNAL));
                }
            }
        }

        let Some(server) = self.log_servers.choose(&mut rand::thread_rng()).copied() else {
            warn!("no log servers configured");
            return Some(Self::nak(pdu, &payload, NAK_S_INTERNAL));
        };

        info!(logname = %logname, server = %server, "create request");

        match self
            .store
            .admit(
                &logname.printable(),
                &server.printable(),
                &pdu.src.printable(),
                payload.rid,
            )
            .await
        {
            Ok(local_rid) => {
                // Forward to the chosen backend with our correlation id
                // in place of the client's; the original is restored
                // when the response comes back.
                let mut forwarded = payload;
                forwarded.rid = local_rid;
                Some(Pdu::new(pdu.dst, server, forwarded.encode()))
            }
            Err(BrokerError::Conflict) => {
                warn!(logname = %logname, "log already exists");
                Some(Self::nak(pdu, &payload, NAK_C_CONFLICT))
            }
            Err(BrokerError::PoolExhausted) => {
                warn!("dedup connection pool exhausted");
                Some(Self::nak(pdu, &payload, NAK_S_INTERNAL))
            }
            Err(e) => {
                warn!(%e, "admission failed");
                Some(Self::nak(pdu, &payload, NAK_S_INTERNAL))
            }
        }
    }

    /// Handle a response PDU (an ack or nak from a backend)
    async fn route_response(&self, pdu: &Pdu, payload: CommandPayload) -> Option<Pdu> {
        if !self.log_servers.contains(&pdu.src) {
            warn!(src = %pdu.src, "received a response from a non-logserver");
            return Some(Self::nak(pdu, &payload, NAK_C_BADREQ));
        }

        info!(rid = payload.rid, "response from log server");

        match self.store.resolve(payload.rid).await {
            Ok((creator, original_rid)) => {
                let creator = match Address::from_printable(&creator) {
                    Ok(creator) => creator,
                    Err(e) => {
                        warn!(%e, "stored creator address is corrupt");
                        return None;
                    }
                };
                let mut reply = payload;
                reply.rid = original_rid;
                Some(Pdu::new(pdu.dst, creator, reply.encode()))
            }
            Err(BrokerError::UnknownResponse(rid)) => {
                // Either an id we never issued or one already answered;
                // both point at the backend, so NAK it back there.
                warn!(rid, "bogus response");
                Some(Self::nak(pdu, &payload, NAK_C_BADREQ))
            }
            Err(e) => {
                // There is no one sensible to NAK without a creator
                // name; report and keep serving.
                warn!(%e, "could not resolve response");
                None
            }
        }
    }

    /// Reply to `pdu`'s sender with the payload's command replaced by a
    /// NAK code
    fn nak(pdu: &Pdu, payload: &CommandPayload, code: u8) -> Pdu {
        info!(code, dst = %pdu.src, "sending NAK");
        let mut naked = payload.clone();
        naked.cmd = code;
        Pdu::new(pdu.dst, pdu.src, naked.encode())
    }
}

impl std::fmt::Debug for CreationBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreationBroker")
            .field("log_servers", &self.log_servers)
            .finish()
    }
}

/// Router-facing service wrapper around a [`CreationBroker`]
pub struct BrokerService {
    config: BrokerConfig,
    broker: Arc<CreationBroker>,
    shutdown_tx: broadcast::Sender<()>,
    task_handle: RwLock<Option<tokio::task::JoinHandle<()>>>,
}

impl BrokerService {
    /// Create a service over `broker` with the given configuration
    pub fn new(config: BrokerConfig, broker: Arc<CreationBroker>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            broker,
            shutdown_tx,
            task_handle: RwLock::new(None),
        }
    }

    /// Connect to the routing layer and start serving.
    ///
    /// Returns immediately; the connection is maintained (and re-dialed
    /// on failure) by a background task until [`shutdown`](Self::shutdown).
    pub async fn start(&self) -> BrokerResult<()> {
        let config = self.config.clone();
        let broker = self.broker.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(Self::run(config, broker, shutdown_rx));
        *self.task_handle.write().await = Some(handle);
        Ok(())
    }

    /// Stop serving and drop the router connection
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.task_handle.write().await.take() {
            let _ = handle.await;
        }
    }

    async fn run(
        config: BrokerConfig,
        broker: Arc<CreationBroker>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        loop {
            match TcpStream::connect(config.router_addr.as_str()).await {
                Ok(stream) => {
                    info!(router = %config.router_addr, "connected to routing layer");
                    let should_exit =
                        Self::serve_connection(stream, &config, &broker, &mut shutdown_rx).await;
                    if should_exit {
                        break;
                    }
                    warn!("connection lost; reconnecting");
                }
                Err(e) => {
                    warn!(router = %config.router_addr, %e, "connection failed");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(config.reconnect_delay) => {}
                _ = shutdown_rx.recv() => break,
            }
        }
        info!("broker service stopped");
    }

    /// Serve one established router connection; returns true when the
    /// service should exit rather than reconnect
    async fn serve_connection(
        stream: TcpStream,
        config: &BrokerConfig,
        broker: &Arc<CreationBroker>,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> bool {
        let framed = Framed::new(stream, PduCodec);
        let (mut sink, mut frames) = framed.split();

        // All outbound PDUs funnel through one writer task so worker
        // tasks never write the connection concurrently.
        let (out_tx, mut out_rx) = mpsc::channel::<Pdu>(1024);
        let writer = tokio::spawn(async move {
            while let Some(pdu) = out_rx.recv().await {
                if let Err(e) = sink.send(pdu).await {
                    warn!(%e, "write failed");
                    break;
                }
            }
        });

        let mut advertise = tokio::time::interval(config.advertise_interval);
        let should_exit = loop {
            tokio::select! {
                _ = advertise.tick() => {
                    debug!(count = config.addrs.len() + 1, "advertising service names");
                    let mut ads = vec![Pdu::advertisement(config.service_addr, config.service_addr)];
                    ads.extend(
                        config
                            .addrs
                            .iter()
                            .map(|addr| Pdu::advertisement(config.service_addr, *addr)),
                    );
                    for ad in ads {
                        if out_tx.send(ad).await.is_err() {
                            break;
                        }
                    }
                }
                frame = frames.next() => match frame {
                    None => break false,
                    Some(Err(e)) => {
                        // Unrecoverable framing state; drop the
                        // connection and re-dial.
                        warn!(%e, "terminating connection");
                        break false;
                    }
                    Some(Ok(pdu)) => {
                        if !Self::accept(&pdu) {
                            continue;
                        }
                        let broker = broker.clone();
                        let out_tx = out_tx.clone();
                        tokio::spawn(async move {
                            if let Some(response) = broker.route_request(&pdu).await {
                                let _ = out_tx.send(response).await;
                            }
                        });
                    }
                },
                _ = shutdown_rx.recv() => break true,
            }
        };

        writer.abort();
        should_exit
    }

    /// Header-level sanity checks shared by every inbound PDU
    fn accept(pdu: &Pdu) -> bool {
        if pdu.addr_format != 0 {
            warn!(addr_format = pdu.addr_format, "address formats not implemented");
            return false;
        }
        if pdu.is_router_nak() {
            warn!(src = %pdu.src, dst = %pdu.dst, "router NAK");
            return false;
        }
        if pdu.pdu_type != 0 {
            warn!(pdu_type = pdu.pdu_type, "PDU type not implemented");
            return false;
        }
        true
    }
}

impl std::fmt::Debug for BrokerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerService")
            .field("config", &self.config)
            .finish()
    }
}
