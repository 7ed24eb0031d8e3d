//! Client connection manager.
//!
//! Owns one logical connection to the tick server and the full lifecycle
//! around it: connect, reconnect with capped exponential backoff, automatic
//! re-subscription after transport churn, and staleness tracking that is
//! deliberately independent of transport liveness.
//!
//! State machine: `disconnected` → `connecting` → `connected`, with
//! `reconnecting` on any transport failure and `stale` while connected but
//! without fresh tick data. `ticks` frames reset the staleness clock;
//! `heartbeat` frames intentionally do not — heartbeat measures the
//! transport, staleness measures the data, and a live-but-quiet feed must
//! still surface as stale.
//!
//! Every public operation is fire-and-forget; outcomes arrive as
//! [`ClientEvent`]s on the channel returned by [`ConnectionManager::new`].
//! Cancellation is a generation counter: `connect()` starts a generation,
//! `disconnect()` bumps it, and the connection thread and staleness monitor
//! both exit as soon as their generation is no longer current. That makes
//! `disconnect()` idempotent and safe from any state, and it is the single
//! teardown path releasing both timers.

use std::collections::{BTreeSet, HashMap};
use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{debug, error, info, warn};
use strum_macros::Display;
use tick_common::net::{
    DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_BASE_DELAY_MS, DEFAULT_STALE_THRESHOLD_MS,
    MAX_BACKOFF_MULTIPLIER,
};
use tick_common::protocol::{ClientMessage, ServerMessage, StatusKind, decode_frame, encode_frame};
use tick_common::tick::normalize_symbols;
use tick_common::{Result, StreamError, TickData};

/// Lifecycle state of the managed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ClientState {
    /// No connection and no pending reconnect. Initial state, and terminal
    /// after reconnect exhaustion or an explicit `disconnect()`.
    Disconnected,
    /// First connection attempt in flight.
    Connecting,
    /// Transport open and data fresh.
    Connected,
    /// Transport lost; retrying with backoff.
    Reconnecting,
    /// Transport open but no tick data within the staleness threshold.
    /// Advisory only — the transport stays up.
    Stale,
}

/// Connection and resilience configuration, consumed as plain values.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Server address, `ip:port`.
    pub server_addr: String,
    /// Consecutive failed attempts tolerated before giving up.
    pub max_reconnect_attempts: u32,
    /// Base reconnection delay; doubles per failure, capped at 8x.
    pub reconnect_base_delay: Duration,
    /// How long the feed may be tick-silent before `stale`.
    pub stale_threshold: Duration,
}

impl ManagerConfig {
    /// Config with default tuning for the given server address.
    pub fn new(server_addr: impl Into<String>) -> Self {
        Self {
            server_addr: server_addr.into(),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_base_delay: Duration::from_millis(DEFAULT_RECONNECT_BASE_DELAY_MS),
            stale_threshold: Duration::from_millis(DEFAULT_STALE_THRESHOLD_MS),
        }
    }
}

/// Events surfaced to the caller; the only way outcomes are observed.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The lifecycle state changed.
    StateChanged(ClientState),
    /// A batch of fresh ticks arrived.
    Ticks(Vec<TickData>),
    /// An authoritative status frame from the server.
    Status {
        /// Status discriminant.
        status: StatusKind,
        /// Complete current subscribed set, when carried.
        subscribed_symbols: Option<Vec<String>>,
        /// Optional human-readable detail.
        message: Option<String>,
    },
    /// The server rejected a request; session state is unchanged.
    ServerError {
        /// Machine-readable error class.
        code: String,
        /// Human-readable detail.
        message: String,
    },
    /// Reconnection attempts were exhausted; the manager is terminal
    /// `disconnected` until `connect()` is called again.
    ReconnectExhausted(String),
}

struct Inner {
    state: ClientState,
    generation: u64,
    /// Subscription intent, independent of any transport object; this is
    /// what gets replayed after a reconnect.
    subscribed: BTreeSet<String>,
    /// Latest tick per symbol. A derived read cache, dropped on disconnect.
    cache: HashMap<String, TickData>,
    last_tick: Option<Instant>,
    writer: Option<TcpStream>,
}

/// Manager owning one logical server connection.
pub struct ConnectionManager {
    config: ManagerConfig,
    inner: Arc<Mutex<Inner>>,
    events_tx: Sender<ClientEvent>,
}

impl ConnectionManager {
    /// Create a manager and the event channel its outcomes arrive on.
    pub fn new(config: ManagerConfig) -> (Self, Receiver<ClientEvent>) {
        let (events_tx, events_rx) = unbounded();
        let manager = Self {
            config,
            inner: Arc::new(Mutex::new(Inner {
                state: ClientState::Disconnected,
                generation: 0,
                subscribed: BTreeSet::new(),
                cache: HashMap::new(),
                last_tick: None,
                writer: None,
            })),
            events_tx,
        };
        (manager, events_rx)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> Result<ClientState> {
        Ok(self.inner.lock()?.state)
    }

    /// Latest cached tick for a symbol, if any has been seen.
    pub fn cached_tick(&self, symbol: &str) -> Result<Option<TickData>> {
        Ok(self.inner.lock()?.cache.get(symbol).cloned())
    }

    /// Open the connection. Fire-and-forget; progress arrives as events.
    ///
    /// No-op unless currently `disconnected` — reconnect sequencing is owned
    /// by the manager and never runs twice concurrently.
    pub fn connect(&self) -> Result<()> {
        let generation = {
            let mut inner = self.inner.lock()?;
            if inner.state != ClientState::Disconnected {
                warn!("connect() ignored in state {}", inner.state);
                return Ok(());
            }
            inner.generation += 1;
            set_state(&mut inner, ClientState::Connecting, &self.events_tx);
            inner.generation
        };

        let conn_inner = Arc::clone(&self.inner);
        let conn_events = self.events_tx.clone();
        let config = self.config.clone();
        thread::spawn(move || run_connection(conn_inner, config, conn_events, generation));

        let stale_inner = Arc::clone(&self.inner);
        let stale_events = self.events_tx.clone();
        let threshold = self.config.stale_threshold;
        thread::spawn(move || staleness_monitor(stale_inner, stale_events, threshold, generation));

        Ok(())
    }

    /// Tear everything down: cancel the reconnect loop and staleness monitor,
    /// drop the tick cache and subscribed-symbol memory, and become
    /// `disconnected`. Idempotent and safe from any state.
    pub fn disconnect(&self) -> Result<()> {
        let mut inner = self.inner.lock()?;
        // Bumping the generation is the cancellation: both background
        // threads check it and exit.
        inner.generation += 1;
        if let Some(writer) = inner.writer.take() {
            let _ = writer.shutdown(Shutdown::Both);
        }
        inner.subscribed.clear();
        inner.cache.clear();
        inner.last_tick = None;
        set_state(&mut inner, ClientState::Disconnected, &self.events_tx);
        Ok(())
    }

    /// Request tick updates for `symbols` (1..=50).
    ///
    /// No-op with a logged warning unless the transport is live; requests
    /// are never queued across reconnects. "Live" deliberately includes the
    /// advisory `stale` state, not just `connected`: staleness flags missing
    /// data on an open transport, and refusing mutations there would leave
    /// no way to resubscribe out of a quiet feed. Changing this either
    /// direction changes observable behavior.
    pub fn subscribe(&self, symbols: &[String]) -> Result<()> {
        self.send_request(symbols, true)
    }

    /// Stop tick updates for `symbols` (1..=50). Same liveness rule as
    /// [`Self::subscribe`].
    pub fn unsubscribe(&self, symbols: &[String]) -> Result<()> {
        self.send_request(symbols, false)
    }

    fn send_request(&self, symbols: &[String], add: bool) -> Result<()> {
        let verb = if add { "subscribe" } else { "unsubscribe" };
        let normalized = normalize_symbols(symbols)?;
        let mut inner = self.inner.lock()?;
        if !transport_live(inner.state) {
            warn!("{} ignored in state {}; not queued", verb, inner.state);
            return Ok(());
        }
        let frame = if add {
            ClientMessage::Subscribe {
                symbols: normalized.clone(),
            }
        } else {
            ClientMessage::Unsubscribe {
                symbols: normalized.clone(),
            }
        };
        write_client_frame(&mut inner, &frame)?;
        // Local intent updated optimistically; the server's next status
        // frame is authoritative and will overwrite it.
        if add {
            inner.subscribed.extend(normalized);
        } else {
            for symbol in &normalized {
                inner.subscribed.remove(symbol);
            }
        }
        Ok(())
    }
}

fn transport_live(state: ClientState) -> bool {
    // Stale is advisory: the transport underneath is still open.
    matches!(state, ClientState::Connected | ClientState::Stale)
}

fn set_state(inner: &mut Inner, state: ClientState, events: &Sender<ClientEvent>) {
    if inner.state != state {
        info!("client state: {} -> {}", inner.state, state);
        inner.state = state;
        let _ = events.send(ClientEvent::StateChanged(state));
    }
}

fn write_client_frame(inner: &mut Inner, frame: &ClientMessage) -> Result<()> {
    let line = encode_frame(frame)?;
    match inner.writer.as_mut() {
        Some(stream) => {
            stream.write_all(line.as_bytes())?;
            Ok(())
        }
        None => Err(StreamError::Transport(
            "no live transport for outbound frame".to_string(),
        )),
    }
}

/// Backoff delay before the attempt following `failed_attempts` consecutive
/// failures: base doubled per failure, capped at
/// [`MAX_BACKOFF_MULTIPLIER`] × base.
fn backoff_delay(failed_attempts: u32, base: Duration) -> Duration {
    let exp = failed_attempts.saturating_sub(1).min(31);
    let multiplier = 2u32
        .saturating_pow(exp)
        .min(MAX_BACKOFF_MULTIPLIER);
    base * multiplier
}

fn is_current(inner: &Arc<Mutex<Inner>>, generation: u64) -> bool {
    inner
        .lock()
        .map(|g| g.generation == generation)
        .unwrap_or(false)
}

/// Connection thread: strictly serialized connect/read/reconnect sequence
/// for one generation. Exits when the generation is cancelled, reconnects
/// are exhausted, or the process ends.
fn run_connection(
    inner: Arc<Mutex<Inner>>,
    config: ManagerConfig,
    events: Sender<ClientEvent>,
    generation: u64,
) {
    let mut failed_attempts: u32 = 0;
    loop {
        if !is_current(&inner, generation) {
            return;
        }
        match TcpStream::connect(&config.server_addr) {
            Ok(stream) => {
                failed_attempts = 0;
                if open_transport(&inner, &events, &stream, generation).is_err() {
                    return;
                }
                info!("connected to {}", config.server_addr);
                resubscribe(&inner, generation);

                if let Err(e) = read_loop(&inner, &events, &stream, generation) {
                    debug!("transport read ended: {}", e);
                }
                if !is_current(&inner, generation) {
                    return;
                }
                if let Ok(mut guard) = inner.lock() {
                    guard.writer = None;
                    set_state(&mut guard, ClientState::Reconnecting, &events);
                }
            }
            Err(e) => {
                failed_attempts += 1;
                warn!(
                    "connect attempt {}/{} to {} failed: {}",
                    failed_attempts, config.max_reconnect_attempts, config.server_addr, e
                );
                if failed_attempts >= config.max_reconnect_attempts {
                    if let Ok(mut guard) = inner.lock() {
                        if guard.generation != generation {
                            return;
                        }
                        set_state(&mut guard, ClientState::Disconnected, &events);
                    }
                    let detail = format!(
                        "gave up after {} reconnect attempts: {}",
                        failed_attempts, e
                    );
                    error!("{}", detail);
                    let _ = events.send(ClientEvent::ReconnectExhausted(detail));
                    return;
                }
                if let Ok(mut guard) = inner.lock() {
                    if guard.generation != generation {
                        return;
                    }
                    set_state(&mut guard, ClientState::Reconnecting, &events);
                }
                sleep_cancellable(
                    backoff_delay(failed_attempts, config.reconnect_base_delay),
                    &inner,
                    generation,
                );
            }
        }
    }
}

fn open_transport(
    inner: &Arc<Mutex<Inner>>,
    events: &Sender<ClientEvent>,
    stream: &TcpStream,
    generation: u64,
) -> Result<()> {
    let writer = stream.try_clone()?;
    let mut guard = inner.lock()?;
    if guard.generation != generation {
        return Err(StreamError::Transport("connection cancelled".to_string()));
    }
    guard.writer = Some(writer);
    // The staleness clock restarts with the transport.
    guard.last_tick = Some(Instant::now());
    set_state(&mut guard, ClientState::Connected, events);
    Ok(())
}

/// Replay the full pre-disconnect subscription intent. This is the
/// resilience guarantee: the caller never re-specifies its symbols.
fn resubscribe(inner: &Arc<Mutex<Inner>>, generation: u64) {
    let Ok(mut guard) = inner.lock() else { return };
    if guard.generation != generation || guard.subscribed.is_empty() {
        return;
    }
    let symbols: Vec<String> = guard.subscribed.iter().cloned().collect();
    info!("restoring subscription for {} symbols", symbols.len());
    let frame = ClientMessage::Subscribe { symbols };
    if let Err(e) = write_client_frame(&mut guard, &frame) {
        warn!("failed to restore subscriptions: {}", e);
    }
}

fn read_loop(
    inner: &Arc<Mutex<Inner>>,
    events: &Sender<ClientEvent>,
    stream: &TcpStream,
    generation: u64,
) -> Result<()> {
    let reader = BufReader::new(stream.try_clone()?);
    for line in reader.lines() {
        let line = line?;
        if !is_current(inner, generation) {
            return Ok(());
        }
        if line.trim().is_empty() {
            continue;
        }
        match decode_frame::<ServerMessage>(&line) {
            Ok(msg) => handle_server_message(inner, events, msg)?,
            // A malformed inbound frame is non-fatal; the feed goes on.
            Err(e) => warn!("ignoring malformed server frame: {}", e),
        }
    }
    Err(StreamError::Transport("server closed the connection".to_string()))
}

fn handle_server_message(
    inner: &Arc<Mutex<Inner>>,
    events: &Sender<ClientEvent>,
    msg: ServerMessage,
) -> Result<()> {
    match msg {
        ServerMessage::Ticks { ticks, .. } => {
            let mut guard = inner.lock()?;
            for tick in &ticks {
                guard.cache.insert(tick.symbol.clone(), tick.clone());
            }
            // Fresh data: restart the staleness clock and leave `stale` if
            // we were in it.
            guard.last_tick = Some(Instant::now());
            if guard.state == ClientState::Stale {
                set_state(&mut guard, ClientState::Connected, events);
            }
            drop(guard);
            let _ = events.send(ClientEvent::Ticks(ticks));
        }
        ServerMessage::Heartbeat { server_time } => {
            // Transport liveness only. Deliberately does not touch the
            // staleness clock: a live-but-quiet feed is still stale.
            debug!("heartbeat, server time {}", server_time);
        }
        ServerMessage::Status {
            status,
            subscribed_symbols,
            message,
        } => {
            if let Some(symbols) = &subscribed_symbols {
                // Status frames carry the complete current set; replace,
                // never merge.
                let mut guard = inner.lock()?;
                guard.subscribed = symbols.iter().cloned().collect();
            }
            let _ = events.send(ClientEvent::Status {
                status,
                subscribed_symbols,
                message,
            });
        }
        ServerMessage::Error { code, message } => {
            warn!("server rejected a request: {} ({})", message, code);
            let _ = events.send(ClientEvent::ServerError { code, message });
        }
    }
    Ok(())
}

/// Staleness monitor for one generation: while `connected`, flip to `stale`
/// once no tick has arrived within the threshold. Exits as soon as the
/// generation is cancelled.
fn staleness_monitor(
    inner: Arc<Mutex<Inner>>,
    events: Sender<ClientEvent>,
    threshold: Duration,
    generation: u64,
) {
    let poll = (threshold / 10).clamp(Duration::from_millis(10), Duration::from_secs(1));
    let ticker = crossbeam_channel::tick(poll);
    loop {
        if ticker.recv().is_err() {
            return;
        }
        let Ok(mut guard) = inner.lock() else { return };
        if guard.generation != generation {
            return;
        }
        // Within one generation `disconnected` only happens at reconnect
        // exhaustion, which is terminal; no point polling further.
        if guard.state == ClientState::Disconnected {
            return;
        }
        if guard.state == ClientState::Connected {
            let elapsed = guard.last_tick.map(|t| t.elapsed());
            if elapsed.is_some_and(|e| e >= threshold) {
                warn!(
                    "no tick data for {} ms; marking stale",
                    threshold.as_millis()
                );
                set_state(&mut guard, ClientState::Stale, &events);
            }
        }
    }
}

fn sleep_cancellable(delay: Duration, inner: &Arc<Mutex<Inner>>, generation: u64) {
    let step = Duration::from_millis(25);
    let deadline = Instant::now() + delay;
    while Instant::now() < deadline {
        if !is_current(inner, generation) {
            return;
        }
        thread::sleep(step.min(deadline.saturating_duration_since(Instant::now())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;

    fn syms(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn recv_state(
        events: &Receiver<ClientEvent>,
        want: ClientState,
        timeout: Duration,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            match events.recv_timeout(deadline - now) {
                Ok(ClientEvent::StateChanged(state)) if state == want => return true,
                Ok(_) => continue,
                Err(_) => return false,
            }
        }
    }

    /// Minimal scripted server: accepts one connection, runs `script` on it.
    fn fake_server<F>(script: F) -> (String, thread::JoinHandle<()>)
    where
        F: FnOnce(TcpStream) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = thread::spawn(move || {
            if let Ok((stream, _)) = listener.accept() {
                script(stream);
            }
        });
        (addr, handle)
    }

    fn read_line(stream: &TcpStream) -> String {
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        line
    }

    #[test]
    fn backoff_doubles_and_caps_at_eight_times_base() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff_delay(1, base), Duration::from_millis(100));
        assert_eq!(backoff_delay(2, base), Duration::from_millis(200));
        assert_eq!(backoff_delay(3, base), Duration::from_millis(400));
        assert_eq!(backoff_delay(4, base), Duration::from_millis(800));
        assert_eq!(backoff_delay(5, base), Duration::from_millis(800));
        assert_eq!(backoff_delay(40, base), Duration::from_millis(800));
    }

    #[test]
    fn state_names_are_lowercase() {
        assert_eq!(ClientState::Reconnecting.to_string(), "reconnecting");
        assert_eq!(ClientState::Stale.to_string(), "stale");
    }

    #[test]
    fn heartbeat_never_resets_the_staleness_clock() {
        let (manager, events) = ConnectionManager::new(ManagerConfig::new("127.0.0.1:1"));
        let old = Instant::now()
            .checked_sub(Duration::from_secs(60))
            .unwrap_or_else(Instant::now);
        {
            let mut guard = manager.inner.lock().unwrap();
            guard.state = ClientState::Connected;
            guard.last_tick = Some(old);
        }

        handle_server_message(
            &manager.inner,
            &manager.events_tx,
            ServerMessage::Heartbeat { server_time: 0 },
        )
        .unwrap();
        let guard = manager.inner.lock().unwrap();
        assert_eq!(guard.last_tick.unwrap(), old, "heartbeat must not refresh");
        assert_eq!(guard.state, ClientState::Connected);
        drop(guard);
        assert!(events.try_recv().is_err(), "heartbeat emits no event");
    }

    #[test]
    fn ticks_refresh_the_clock_and_clear_stale() {
        let (manager, events) = ConnectionManager::new(ManagerConfig::new("127.0.0.1:1"));
        {
            let mut guard = manager.inner.lock().unwrap();
            guard.state = ClientState::Stale;
            guard.last_tick = Instant::now().checked_sub(Duration::from_secs(60));
        }
        let tick = TickData {
            symbol: "AAPL".to_string(),
            price: 190.0,
            high: 191.0,
            low: 189.0,
            open: 189.5,
            change: 0.5,
            change_percent: 0.26,
            volume: 10,
            timestamp: 0,
        };
        handle_server_message(
            &manager.inner,
            &manager.events_tx,
            ServerMessage::Ticks {
                ticks: vec![tick.clone()],
                server_time: 0,
                interval: 10_000,
            },
        )
        .unwrap();

        let guard = manager.inner.lock().unwrap();
        assert_eq!(guard.state, ClientState::Connected);
        assert!(guard.last_tick.unwrap().elapsed() < Duration::from_secs(1));
        assert_eq!(guard.cache["AAPL"].price, 190.0);
        drop(guard);

        assert!(recv_state(&events, ClientState::Connected, Duration::from_secs(1)));
        assert!(matches!(
            events.recv_timeout(Duration::from_secs(1)).unwrap(),
            ClientEvent::Ticks(batch) if batch.len() == 1
        ));
    }

    #[test]
    fn status_frames_replace_subscription_memory() {
        let (manager, _events) = ConnectionManager::new(ManagerConfig::new("127.0.0.1:1"));
        manager.inner.lock().unwrap().subscribed = syms(&["OLD"]).into_iter().collect();

        handle_server_message(
            &manager.inner,
            &manager.events_tx,
            ServerMessage::Status {
                status: StatusKind::Subscribed,
                subscribed_symbols: Some(syms(&["AAPL", "GOOGL"])),
                message: None,
            },
        )
        .unwrap();
        let guard = manager.inner.lock().unwrap();
        let held: Vec<&str> = guard.subscribed.iter().map(|s| s.as_str()).collect();
        assert_eq!(held, vec!["AAPL", "GOOGL"]);
    }

    #[test]
    fn subscribe_is_a_warned_noop_while_not_connected() {
        let (manager, _events) = ConnectionManager::new(ManagerConfig::new("127.0.0.1:1"));
        manager.subscribe(&syms(&["AAPL"])).unwrap();
        assert!(manager.inner.lock().unwrap().subscribed.is_empty());

        manager.inner.lock().unwrap().state = ClientState::Reconnecting;
        manager.subscribe(&syms(&["AAPL"])).unwrap();
        assert!(
            manager.inner.lock().unwrap().subscribed.is_empty(),
            "requests are never queued across reconnects"
        );
    }

    #[test]
    fn reconnect_restores_the_pre_disconnect_symbol_set() {
        // First server instance: take the subscribe, then drop the
        // connection to force a reconnect.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = thread::spawn(move || {
            // Round 1: explicit subscribe from the caller.
            let (stream, _) = listener.accept().unwrap();
            let line = read_line(&stream);
            let msg: ClientMessage = decode_frame(&line).unwrap();
            assert_eq!(
                msg,
                ClientMessage::Subscribe {
                    symbols: syms(&["AAPL", "GOOGL"]),
                }
            );
            stream.shutdown(Shutdown::Both).unwrap();

            // Round 2: the manager must replay the same set on its own.
            let (stream, _) = listener.accept().unwrap();
            let line = read_line(&stream);
            let msg: ClientMessage = decode_frame(&line).unwrap();
            assert_eq!(
                msg,
                ClientMessage::Subscribe {
                    symbols: syms(&["AAPL", "GOOGL"]),
                }
            );
        });

        let mut config = ManagerConfig::new(addr);
        config.reconnect_base_delay = Duration::from_millis(20);
        let (manager, events) = ConnectionManager::new(config);
        manager.connect().unwrap();
        assert!(recv_state(&events, ClientState::Connected, Duration::from_secs(5)));

        // Case-normalized on the way out as well.
        manager.subscribe(&syms(&["aapl", "googl"])).unwrap();

        assert!(recv_state(&events, ClientState::Reconnecting, Duration::from_secs(5)));
        assert!(recv_state(&events, ClientState::Connected, Duration::from_secs(5)));
        server.join().unwrap();
        manager.disconnect().unwrap();
    }

    #[test]
    fn exhausted_reconnects_end_terminally_disconnected() {
        // Reserve a port with no listener behind it.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let mut config = ManagerConfig::new(addr);
        config.max_reconnect_attempts = 3;
        config.reconnect_base_delay = Duration::from_millis(10);
        let (manager, events) = ConnectionManager::new(config);
        manager.connect().unwrap();

        assert!(recv_state(&events, ClientState::Disconnected, Duration::from_secs(5)));
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut exhausted = false;
        while Instant::now() < deadline {
            match events.recv_timeout(Duration::from_millis(100)) {
                Ok(ClientEvent::ReconnectExhausted(_)) => {
                    exhausted = true;
                    break;
                }
                Ok(_) => continue,
                Err(_) => continue,
            }
        }
        assert!(exhausted, "exhaustion is surfaced as an event");
        assert_eq!(manager.state().unwrap(), ClientState::Disconnected);
    }

    #[test]
    fn quiet_feed_goes_stale_and_recovers_on_ticks() {
        let (cmd_tx, cmd_rx) = unbounded::<ServerMessage>();
        let (addr, server) = fake_server(move |mut stream| {
            // Forward scripted frames; never send anything unprompted.
            while let Ok(msg) = cmd_rx.recv() {
                let line = encode_frame(&msg).unwrap();
                if stream.write_all(line.as_bytes()).is_err() {
                    break;
                }
            }
            let mut sink = Vec::new();
            let _ = stream.try_clone().map(|mut s| s.read_to_end(&mut sink));
        });

        let mut config = ManagerConfig::new(addr);
        config.stale_threshold = Duration::from_millis(150);
        let (manager, events) = ConnectionManager::new(config);
        manager.connect().unwrap();
        assert!(recv_state(&events, ClientState::Connected, Duration::from_secs(5)));

        // Heartbeats alone, no matter how frequent, never clear staleness.
        for _ in 0..20 {
            cmd_tx
                .send(ServerMessage::Heartbeat { server_time: 0 })
                .unwrap();
            thread::sleep(Duration::from_millis(20));
        }
        assert!(recv_state(&events, ClientState::Stale, Duration::from_secs(5)));

        cmd_tx
            .send(ServerMessage::Ticks {
                ticks: vec![TickData {
                    symbol: "AAPL".to_string(),
                    price: 190.0,
                    high: 191.0,
                    low: 189.0,
                    open: 189.5,
                    change: 0.5,
                    change_percent: 0.26,
                    volume: 10,
                    timestamp: 0,
                }],
                server_time: 0,
                interval: 10_000,
            })
            .unwrap();
        assert!(recv_state(&events, ClientState::Connected, Duration::from_secs(5)));

        manager.disconnect().unwrap();
        drop(cmd_tx);
        server.join().unwrap();
    }

    #[test]
    fn disconnect_is_idempotent_and_clears_local_memory() {
        let (manager, _events) = ConnectionManager::new(ManagerConfig::new("127.0.0.1:1"));
        {
            let mut guard = manager.inner.lock().unwrap();
            guard.state = ClientState::Connected;
            guard.subscribed = syms(&["AAPL"]).into_iter().collect();
            guard.cache.insert(
                "AAPL".to_string(),
                TickData {
                    symbol: "AAPL".to_string(),
                    price: 1.0,
                    high: 1.0,
                    low: 1.0,
                    open: 1.0,
                    change: 0.0,
                    change_percent: 0.0,
                    volume: 0,
                    timestamp: 0,
                },
            );
        }
        manager.disconnect().unwrap();
        manager.disconnect().unwrap();

        let guard = manager.inner.lock().unwrap();
        assert_eq!(guard.state, ClientState::Disconnected);
        assert!(guard.subscribed.is_empty());
        assert!(guard.cache.is_empty());
        assert!(guard.last_tick.is_none());
    }
}
