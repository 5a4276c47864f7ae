//! Command execution state machines
//!
//! A high-level request is one of four shapes: a plain command, a command
//! behind a challenge, a challenge command that additionally appends the
//! security PIN, and a challenge command whose completion is reported
//! through accept/complete status messages. Each shape is sequenced by its
//! own machine below; all of them poll the shared receive state and give
//! up once the per-step deadline elapses.

use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::NukiConfig;
use crate::dispatch::RxState;
use crate::errors::CmdResult;
use crate::types::{CommandId, ERROR_BUSY, STATUS_ACCEPTED, STATUS_COMPLETE};

// ----------------------------------------------------------------------------
// Actions
// ----------------------------------------------------------------------------

/// The four request shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// Send, then accept the next non-error response
    Command,
    /// Fetch a challenge nonce first, bind it into the request
    CommandWithChallenge,
    /// Like `CommandWithChallenge`, completion signalled via accept/complete
    CommandWithChallengeAndAccept,
    /// Like `CommandWithChallenge`, with the security PIN appended
    CommandWithChallengeAndPin,
}

/// One pending request. At most one exists per device at any time.
#[derive(Debug, Clone)]
pub struct Action {
    pub kind: ActionKind,
    pub command: CommandId,
    pub payload: Vec<u8>,
}

impl Action {
    pub fn new(kind: ActionKind, command: CommandId, payload: Vec<u8>) -> Self {
        Self {
            kind,
            command,
            payload,
        }
    }

    /// Plain read request for a data record
    pub fn request(record: CommandId) -> Self {
        Self::new(
            ActionKind::Command,
            CommandId::REQUEST_DATA,
            record.to_le_bytes().to_vec(),
        )
    }
}

/// Progress of the machine currently executing, kept in the shared receive
/// state so it can be observed alongside the fields it gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandState {
    #[default]
    Idle,
    ChallengeSent,
    ChallengeRespReceived,
    CmdSent,
    CmdAccepted,
}

// ----------------------------------------------------------------------------
// Link seam
// ----------------------------------------------------------------------------

/// What the machines need from the outside world: a way to put an
/// authenticated frame on the wire.
#[async_trait]
pub(crate) trait CommandLink: Send + Sync {
    async fn send_encrypted(&self, command: CommandId, payload: &[u8]) -> bool;
}

// ----------------------------------------------------------------------------
// Engine
// ----------------------------------------------------------------------------

/// Run one action to completion.
///
/// `pin` carries the little-endian PIN bytes for the PIN-gated shape.
/// Single-flight and precondition checks (pairing, heartbeat) are the
/// caller's responsibility.
pub(crate) async fn execute<I: Send>(
    link: &dyn CommandLink,
    rx: &Mutex<RxState<I>>,
    config: &NukiConfig,
    action: &Action,
    pin: Option<Vec<u8>>,
) -> CmdResult {
    debug!(command = %action.command, kind = ?action.kind, "executing action");
    let result = match action.kind {
        ActionKind::Command => run_plain(link, rx, config, action).await,
        ActionKind::CommandWithChallenge => run_challenge(link, rx, config, action, None).await,
        ActionKind::CommandWithChallengeAndPin => {
            run_challenge(link, rx, config, action, pin).await
        }
        ActionKind::CommandWithChallengeAndAccept => {
            run_challenge_accept(link, rx, config, action).await
        }
    };
    rx.lock().unwrap().command_state = CommandState::Idle;
    result
}

/// Poll the receive state until `pred` yields, or `deadline` passes
async fn wait_for<I, T>(
    rx: &Mutex<RxState<I>>,
    config: &NukiConfig,
    deadline: Instant,
    mut pred: impl FnMut(&mut RxState<I>) -> Option<T>,
) -> Option<T> {
    loop {
        if let Some(value) = pred(&mut rx.lock().unwrap()) {
            return Some(value);
        }
        if Instant::now() >= deadline {
            return None;
        }
        sleep(config.command_poll_interval).await;
    }
}

fn enter<I>(rx: &Mutex<RxState<I>>, state: CommandState) {
    rx.lock().unwrap().command_state = state;
}

/// Map an `ErrorReport` code to the caller-visible outcome
fn classify_error(code: u8) -> CmdResult {
    if code == ERROR_BUSY {
        debug!("command failed, device busy");
        CmdResult::LockBusy
    } else {
        debug!(code = %format_args!("0x{code:02x}"), "command failed");
        CmdResult::Failed
    }
}

/// Outcome of one wait on the receive state
enum Wait {
    Error(u8),
    Done,
}

// ----------------------------------------------------------------------------
// Plain command
// ----------------------------------------------------------------------------

async fn run_plain<I: Send>(
    link: &dyn CommandLink,
    rx: &Mutex<RxState<I>>,
    config: &NukiConfig,
    action: &Action,
) -> CmdResult {
    rx.lock().unwrap().arm();

    if !link
        .send_encrypted(CommandId::REQUEST_DATA, &action.payload)
        .await
    {
        warn!("sending command failed");
        return CmdResult::Failed;
    }
    enter(rx, CommandState::CmdSent);

    let deadline = Instant::now() + config.command_timeout;
    let outcome = wait_for(rx, config, deadline, |rx| match rx.last_command {
        Some(CommandId::ERROR_REPORT) => Some(Wait::Error(rx.error_code)),
        Some(_) => Some(Wait::Done),
        None => None,
    })
    .await;

    match outcome {
        Some(Wait::Done) => CmdResult::Success,
        Some(Wait::Error(code)) => classify_error(code),
        None => {
            warn!("command timed out");
            CmdResult::TimeOut
        }
    }
}

// ----------------------------------------------------------------------------
// Challenge-bound command (optionally PIN-gated)
// ----------------------------------------------------------------------------

/// Fetch a fresh challenge nonce; the first half of both challenge shapes
async fn fetch_challenge<I: Send>(
    link: &dyn CommandLink,
    rx: &Mutex<RxState<I>>,
    config: &NukiConfig,
) -> Result<[u8; 32], CmdResult> {
    rx.lock().unwrap().arm();
    if !link
        .send_encrypted(CommandId::REQUEST_DATA, &CommandId::CHALLENGE.to_le_bytes())
        .await
    {
        warn!("sending challenge request failed");
        return Err(CmdResult::Failed);
    }
    enter(rx, CommandState::ChallengeSent);

    let deadline = Instant::now() + config.command_timeout;
    let outcome = wait_for(rx, config, deadline, |rx| match rx.last_command {
        Some(CommandId::CHALLENGE) => rx.take_challenge().map(Ok),
        Some(CommandId::ERROR_REPORT) => Some(Err(rx.error_code)),
        _ => None,
    })
    .await;

    match outcome {
        Some(Ok(nonce)) => {
            enter(rx, CommandState::ChallengeRespReceived);
            Ok(nonce)
        }
        Some(Err(code)) => Err(classify_error(code)),
        None => {
            warn!("challenge request timed out");
            Err(CmdResult::TimeOut)
        }
    }
}

async fn run_challenge<I: Send>(
    link: &dyn CommandLink,
    rx: &Mutex<RxState<I>>,
    config: &NukiConfig,
    action: &Action,
    pin: Option<Vec<u8>>,
) -> CmdResult {
    let nonce = match fetch_challenge(link, rx, config).await {
        Ok(nonce) => nonce,
        Err(result) => return result,
    };

    // Bind the nonce (and PIN, when present) into the outgoing payload.
    let mut payload = action.payload.clone();
    payload.extend_from_slice(&nonce);
    if let Some(pin) = pin {
        payload.extend_from_slice(&pin);
    }

    {
        let mut rx = rx.lock().unwrap();
        rx.arm();
        rx.crc_ok = false;
    }
    if !link.send_encrypted(action.command, &payload).await {
        warn!("sending command failed");
        return CmdResult::Failed;
    }
    enter(rx, CommandState::CmdSent);

    let deadline = Instant::now() + config.command_timeout;
    let outcome = wait_for(rx, config, deadline, |rx| match rx.last_command {
        Some(CommandId::ERROR_REPORT) => Some(Wait::Error(rx.error_code)),
        // Any correctly authenticated response completes the exchange.
        _ if rx.crc_ok => Some(Wait::Done),
        _ => None,
    })
    .await;

    match outcome {
        Some(Wait::Done) => CmdResult::Success,
        Some(Wait::Error(code)) => classify_error(code),
        None => {
            warn!("command timed out");
            CmdResult::TimeOut
        }
    }
}

// ----------------------------------------------------------------------------
// Challenge command with accept/complete status
// ----------------------------------------------------------------------------

async fn run_challenge_accept<I: Send>(
    link: &dyn CommandLink,
    rx: &Mutex<RxState<I>>,
    config: &NukiConfig,
    action: &Action,
) -> CmdResult {
    let nonce = match fetch_challenge(link, rx, config).await {
        Ok(nonce) => nonce,
        Err(result) => return result,
    };

    let mut payload = action.payload.clone();
    payload.extend_from_slice(&nonce);

    {
        let mut rx = rx.lock().unwrap();
        rx.arm();
        rx.received_status = None;
    }
    if !link.send_encrypted(action.command, &payload).await {
        warn!("sending command failed");
        return CmdResult::Failed;
    }
    enter(rx, CommandState::CmdSent);

    enum Accept {
        Accepted,
        Complete,
        Error(u8),
    }

    let deadline = Instant::now() + config.command_timeout;
    let outcome = wait_for(rx, config, deadline, |rx| match rx.last_command {
        Some(CommandId::ERROR_REPORT) => Some(Accept::Error(rx.error_code)),
        Some(CommandId::STATUS) => match rx.received_status {
            Some(STATUS_ACCEPTED) => Some(Accept::Accepted),
            // The device may skip the accept phase entirely, e.g. when it
            // already is in the requested state.
            Some(STATUS_COMPLETE) => Some(Accept::Complete),
            _ => None,
        },
        _ => None,
    })
    .await;

    match outcome {
        Some(Accept::Complete) => {
            debug!("command complete (accept skipped)");
            return CmdResult::Success;
        }
        Some(Accept::Error(code)) => return classify_error(code),
        Some(Accept::Accepted) => {}
        None => {
            warn!("accept timed out");
            return CmdResult::TimeOut;
        }
    }

    {
        let mut rx = rx.lock().unwrap();
        rx.arm();
        rx.received_status = None;
        rx.command_state = CommandState::CmdAccepted;
    }

    let deadline = Instant::now() + config.command_timeout;
    let outcome = wait_for(rx, config, deadline, |rx| match rx.last_command {
        Some(CommandId::ERROR_REPORT) => Some(Wait::Error(rx.error_code)),
        Some(CommandId::STATUS) if rx.received_status == Some(STATUS_COMPLETE) => {
            Some(Wait::Done)
        }
        _ => None,
    })
    .await;

    match outcome {
        Some(Wait::Done) => CmdResult::Success,
        Some(Wait::Error(code)) => classify_error(code),
        None => {
            warn!("completion timed out");
            CmdResult::TimeOut
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Scripted link: records sends and plays responses into the rx state
    struct ScriptedLink {
        rx: Arc<Mutex<RxState<()>>>,
        sends: AtomicUsize,
        script: Mutex<Vec<Box<dyn FnOnce(&mut RxState<()>) + Send>>>,
    }

    impl ScriptedLink {
        fn new(rx: Arc<Mutex<RxState<()>>>) -> Self {
            Self {
                rx,
                sends: AtomicUsize::new(0),
                script: Mutex::new(Vec::new()),
            }
        }

        fn push(&self, step: impl FnOnce(&mut RxState<()>) + Send + 'static) {
            self.script.lock().unwrap().push(Box::new(step));
        }
    }

    #[async_trait]
    impl CommandLink for ScriptedLink {
        async fn send_encrypted(&self, _command: CommandId, _payload: &[u8]) -> bool {
            self.sends.fetch_add(1, Ordering::SeqCst);
            let step = {
                let mut script = self.script.lock().unwrap();
                if script.is_empty() {
                    None
                } else {
                    Some(script.remove(0))
                }
            };
            if let Some(step) = step {
                step(&mut self.rx.lock().unwrap());
            }
            true
        }
    }

    fn config() -> NukiConfig {
        NukiConfig::new().with_command_timeout(Duration::from_millis(100))
    }

    fn challenge_step(nonce: [u8; 32]) -> impl FnOnce(&mut RxState<()>) + Send {
        move |rx| {
            rx.crc_ok = true;
            rx.challenge_nonce = Some(nonce);
            rx.last_command = Some(CommandId::CHALLENGE);
        }
    }

    #[tokio::test]
    async fn test_plain_command_success() {
        let rx = Arc::new(Mutex::new(RxState::<()>::default()));
        let link = ScriptedLink::new(rx.clone());
        link.push(|rx| {
            rx.crc_ok = true;
            rx.last_command = Some(CommandId::KEYTURNER_STATES);
        });

        let action = Action::request(CommandId::KEYTURNER_STATES);
        let result = execute(&link, &rx, &config(), &action, None).await;
        assert_eq!(result, CmdResult::Success);
        assert_eq!(link.sends.load(Ordering::SeqCst), 1);
        assert_eq!(rx.lock().unwrap().command_state, CommandState::Idle);
    }

    #[tokio::test]
    async fn test_plain_command_timeout() {
        let rx = Arc::new(Mutex::new(RxState::<()>::default()));
        let link = ScriptedLink::new(rx.clone());
        let action = Action::request(CommandId::KEYTURNER_STATES);
        let result = execute(&link, &rx, &config(), &action, None).await;
        assert_eq!(result, CmdResult::TimeOut);
    }

    #[tokio::test]
    async fn test_busy_maps_to_lock_busy() {
        let rx = Arc::new(Mutex::new(RxState::<()>::default()));
        let link = ScriptedLink::new(rx.clone());
        link.push(|rx| {
            rx.crc_ok = true;
            rx.error_code = ERROR_BUSY;
            rx.last_command = Some(CommandId::ERROR_REPORT);
        });

        let action = Action::request(CommandId::KEYTURNER_STATES);
        let result = execute(&link, &rx, &config(), &action, None).await;
        assert_eq!(result, CmdResult::LockBusy);
    }

    #[tokio::test]
    async fn test_challenge_command_appends_nonce() {
        let rx = Arc::new(Mutex::new(RxState::<()>::default()));
        let link = ScriptedLink::new(rx.clone());
        link.push(challenge_step([0xAB; 32]));
        link.push(|rx| {
            rx.crc_ok = true;
            rx.last_command = Some(CommandId::CONFIG);
        });

        let action = Action::new(
            ActionKind::CommandWithChallenge,
            CommandId::REQUEST_CONFIG,
            vec![],
        );
        let result = execute(&link, &rx, &config(), &action, None).await;
        assert_eq!(result, CmdResult::Success);
        assert_eq!(link.sends.load(Ordering::SeqCst), 2);
        // the challenge nonce was consumed
        assert!(rx.lock().unwrap().challenge_nonce.is_none());
    }

    #[tokio::test]
    async fn test_accept_then_complete() {
        let rx = Arc::new(Mutex::new(RxState::<()>::default()));
        let link = ScriptedLink::new(rx.clone());
        link.push(challenge_step([1; 32]));
        link.push(|rx| {
            rx.crc_ok = true;
            rx.received_status = Some(STATUS_ACCEPTED);
            rx.last_command = Some(CommandId::STATUS);
        });

        let action = Action::new(
            ActionKind::CommandWithChallengeAndAccept,
            CommandId::LOCK_ACTION,
            vec![0x01],
        );

        // Complete arrives while the machine waits in CmdAccepted.
        let rx2 = rx.clone();
        let complete = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            let mut rx = rx2.lock().unwrap();
            rx.received_status = Some(STATUS_COMPLETE);
            rx.last_command = Some(CommandId::STATUS);
        });

        let result = execute(&link, &rx, &config(), &action, None).await;
        complete.await.unwrap();
        assert_eq!(result, CmdResult::Success);
    }

    #[tokio::test]
    async fn test_accept_short_circuit_complete() {
        let rx = Arc::new(Mutex::new(RxState::<()>::default()));
        let link = ScriptedLink::new(rx.clone());
        link.push(challenge_step([1; 32]));
        link.push(|rx| {
            rx.crc_ok = true;
            rx.received_status = Some(STATUS_COMPLETE);
            rx.last_command = Some(CommandId::STATUS);
        });

        let action = Action::new(
            ActionKind::CommandWithChallengeAndAccept,
            CommandId::LOCK_ACTION,
            vec![0x01],
        );
        let result = execute(&link, &rx, &config(), &action, None).await;
        assert_eq!(result, CmdResult::Success);
    }

    #[tokio::test]
    async fn test_error_after_accept() {
        let rx = Arc::new(Mutex::new(RxState::<()>::default()));
        let link = ScriptedLink::new(rx.clone());
        link.push(challenge_step([1; 32]));
        link.push(|rx| {
            rx.crc_ok = true;
            rx.received_status = Some(STATUS_ACCEPTED);
            rx.last_command = Some(CommandId::STATUS);
        });

        let action = Action::new(
            ActionKind::CommandWithChallengeAndAccept,
            CommandId::LOCK_ACTION,
            vec![0x01],
        );

        let rx2 = rx.clone();
        let error = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            let mut rx = rx2.lock().unwrap();
            rx.error_code = ERROR_BUSY;
            rx.last_command = Some(CommandId::ERROR_REPORT);
        });

        let result = execute(&link, &rx, &config(), &action, None).await;
        error.await.unwrap();
        assert_eq!(result, CmdResult::LockBusy);
    }

    #[tokio::test]
    async fn test_pin_appended_after_nonce() {
        let rx = Arc::new(Mutex::new(RxState::<()>::default()));

        struct CapturingLink {
            inner: ScriptedLink,
            captured: Mutex<Vec<(CommandId, Vec<u8>)>>,
        }

        #[async_trait]
        impl CommandLink for CapturingLink {
            async fn send_encrypted(&self, command: CommandId, payload: &[u8]) -> bool {
                self.captured
                    .lock()
                    .unwrap()
                    .push((command, payload.to_vec()));
                self.inner.send_encrypted(command, payload).await
            }
        }

        let link = CapturingLink {
            inner: ScriptedLink::new(rx.clone()),
            captured: Mutex::new(Vec::new()),
        };
        link.inner.push(challenge_step([0x77; 32]));
        link.inner.push(|rx| {
            rx.crc_ok = true;
            rx.last_command = Some(CommandId::STATUS);
        });

        let action = Action::new(
            ActionKind::CommandWithChallengeAndPin,
            CommandId::VERIFY_SECURITY_PIN,
            vec![],
        );
        let pin = vec![0x39, 0x30]; // 12345 LE
        let result = execute(&link, &rx, &config(), &action, Some(pin.clone())).await;
        assert_eq!(result, CmdResult::Success);

        let captured = link.captured.lock().unwrap();
        let (command, payload) = &captured[1];
        assert_eq!(*command, CommandId::VERIFY_SECURITY_PIN);
        assert_eq!(&payload[..32], &[0x77; 32]);
        assert_eq!(&payload[32..], &pin[..]);
    }
}
