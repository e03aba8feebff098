//! Session bookkeeping and blob relaying shared by every handler.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use mondo_rpc::RpcStatus;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::{DEFAULT_MAILBOX_LIMIT, ServerConfig};
use crate::messages::{Blob, Input, LoginRequest, Output, SessionId};

#[derive(Debug)]
struct Session {
	user: String,
	last_seen: Instant,
}

/// Live sessions, the user each one belongs to, and when each was last heard from.
#[derive(Debug, Default)]
pub struct SessionRegistry {
	sessions: Mutex<HashMap<SessionId, Session>>,
}

impl SessionRegistry {
	/// Creates an empty registry.
	pub fn new() -> Self {
		Self::default()
	}

	/// Opens a session for `user` under a fresh random id.
	pub fn issue(&self, user: &str) -> SessionId {
		let mut sessions = self.sessions.lock();
		loop {
			let (id, _) = uuid::Uuid::new_v4().as_u64_pair();
			let id = SessionId(id);
			if id.0 != 0 && !sessions.contains_key(&id) {
				sessions.insert(
					id,
					Session {
						user: user.to_owned(),
						last_seen: Instant::now(),
					},
				);
				return id;
			}
		}
	}

	/// Returns true while `id` names an open session.
	pub fn validate(&self, id: SessionId) -> bool {
		self.sessions.lock().contains_key(&id)
	}

	/// Marks `id` as seen at `at`. Returns false if it is not open.
	pub fn touch(&self, id: SessionId, at: Instant) -> bool {
		match self.sessions.lock().get_mut(&id) {
			Some(session) => {
				session.last_seen = session.last_seen.max(at);
				true
			}
			None => false,
		}
	}

	/// User owning session `id`.
	pub fn user(&self, id: SessionId) -> Option<String> {
		self.sessions.lock().get(&id).map(|session| session.user.clone())
	}

	/// Closes session `id`. Returns false if it was not open.
	pub fn end(&self, id: SessionId) -> bool {
		self.sessions.lock().remove(&id).is_some()
	}

	/// Closes every session not seen for longer than `idle` as of `now`, returning their ids.
	pub fn expire(&self, now: Instant, idle: Duration) -> Vec<SessionId> {
		let mut expired = Vec::new();
		self.sessions.lock().retain(|id, session| {
			let keep = now.saturating_duration_since(session.last_seen) <= idle;
			if !keep {
				expired.push(*id);
			}
			keep
		});
		expired
	}

	/// Number of open sessions.
	pub fn len(&self) -> usize {
		self.sessions.lock().len()
	}

	/// Returns true when no session is open.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

/// Per-session mailboxes, each holding at most `limit` undelivered blobs.
#[derive(Debug)]
pub struct DataExchange {
	mailboxes: Mutex<HashMap<SessionId, VecDeque<Blob>>>,
	limit: usize,
}

impl Default for DataExchange {
	fn default() -> Self {
		Self::with_limit(DEFAULT_MAILBOX_LIMIT)
	}
}

impl DataExchange {
	/// Creates an exchange with the default mailbox limit.
	pub fn new() -> Self {
		Self::default()
	}

	/// Creates an exchange whose mailboxes keep the newest `limit` blobs; 0 means unbounded.
	pub fn with_limit(limit: usize) -> Self {
		Self {
			mailboxes: Mutex::default(),
			limit,
		}
	}

	/// Opens an empty mailbox for `session`.
	pub fn open(&self, session: SessionId) {
		self.mailboxes.lock().entry(session).or_default();
	}

	/// Closes the mailbox of `session`, discarding undelivered blobs.
	pub fn close(&self, session: SessionId) {
		self.mailboxes.lock().remove(&session);
	}

	/// Copies `blobs` into every mailbox except the sender's. Returns the number of recipients.
	///
	/// A mailbox over its limit drops its oldest blobs.
	pub fn publish(&self, from: SessionId, blobs: &[Blob]) -> usize {
		if blobs.is_empty() {
			return 0;
		}
		let mut mailboxes = self.mailboxes.lock();
		let mut recipients = 0;
		for (session, mailbox) in mailboxes.iter_mut() {
			if *session == from {
				continue;
			}
			mailbox.extend(blobs.iter().cloned());
			if self.limit > 0 && mailbox.len() > self.limit {
				let dropped = mailbox.len() - self.limit;
				mailbox.drain(..dropped);
				debug!(session = %session, dropped, "hello.mailbox.overflow");
			}
			recipients += 1;
		}
		recipients
	}

	/// Number of blobs waiting for `session`.
	pub fn pending(&self, session: SessionId) -> usize {
		self.mailboxes.lock().get(&session).map_or(0, VecDeque::len)
	}

	/// Takes every blob waiting for `session`, oldest first.
	pub fn take(&self, session: SessionId) -> Vec<Blob> {
		self.mailboxes
			.lock()
			.get_mut(&session)
			.map(|mailbox| mailbox.drain(..).collect())
			.unwrap_or_default()
	}
}

/// Application state behind the hello service.
#[derive(Debug)]
pub struct Relay {
	sessions: SessionRegistry,
	exchange: DataExchange,
	greeting: String,
	greetings: u32,
	token: Option<String>,
	idle: Option<Duration>,
}

impl Relay {
	/// Creates a relay using the greeting and access token of `config`.
	pub fn new(config: &ServerConfig) -> Self {
		Self {
			sessions: SessionRegistry::new(),
			exchange: DataExchange::with_limit(config.mailbox_limit),
			greeting: config.greeting.clone(),
			greetings: config.greetings,
			token: config.token.clone(),
			idle: config.session_idle(),
		}
	}

	/// Session registry.
	pub fn sessions(&self) -> &SessionRegistry {
		&self.sessions
	}

	/// Blob exchange.
	pub fn exchange(&self) -> &DataExchange {
		&self.exchange
	}

	/// Opens a session and greets the user.
	///
	/// # Errors
	///
	/// `InvalidArgument` for an empty user name, `Unauthenticated` for a wrong token.
	pub fn start_session(&self, request: &LoginRequest) -> Result<Input, RpcStatus> {
		let user = request.user.trim();
		if user.is_empty() {
			return Err(RpcStatus::invalid_argument("user must not be empty"));
		}
		if let Some(expected) = &self.token
			&& request.token.as_deref() != Some(expected.as_str())
		{
			return Err(RpcStatus::new(mondo_rpc::StatusCode::Unauthenticated, "bad token"));
		}

		self.expire_idle(Instant::now());
		let session_id = self.sessions.issue(user);
		self.exchange.open(session_id);
		info!(session = %session_id, user, "hello.session.start");

		let greeting = format!("{}, {user}", self.greeting);
		let blobs = (0..self.greetings).map(|_| Blob::text("greeting", &greeting)).collect();
		Ok(Input { session_id, blobs })
	}

	/// Publishes the input blobs to the other sessions and returns this session's mailbox.
	///
	/// Unknown sessions are reported through [`Output::error`].
	pub fn poll_in_out(&self, input: Input) -> Output {
		let now = Instant::now();
		self.expire_idle(now);
		if !self.sessions.touch(input.session_id, now) {
			debug!(session = %input.session_id, "hello.session.unknown");
			return Output {
				session_id: input.session_id,
				blobs: Vec::new(),
				error: Some(format!("unknown session {}", input.session_id)),
			};
		}
		let recipients = self.exchange.publish(input.session_id, &input.blobs);
		let blobs = self.exchange.take(input.session_id);
		debug!(
			session = %input.session_id,
			published = input.blobs.len(),
			recipients,
			delivered = blobs.len(),
			"hello.session.poll"
		);
		Output {
			session_id: input.session_id,
			blobs,
			error: None,
		}
	}

	/// Closes a session and its mailbox.
	pub fn end_session(&self, id: SessionId) -> bool {
		self.exchange.close(id);
		self.sessions.end(id)
	}

	/// Ends every session that has been idle longer than the configured limit as of `now`.
	///
	/// Runs on every `StartSession` and `PollInOut`. Returns the number of sessions ended.
	pub fn expire_idle(&self, now: Instant) -> usize {
		let Some(idle) = self.idle else {
			return 0;
		};
		let expired = self.sessions.expire(now, idle);
		for id in &expired {
			self.exchange.close(*id);
			info!(session = %id, "hello.session.expired");
		}
		expired.len()
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	fn relay() -> Relay {
		Relay::new(&ServerConfig::default())
	}

	fn login(user: &str) -> LoginRequest {
		LoginRequest {
			user: user.into(),
			token: None,
		}
	}

	#[test]
	fn login_greets_configured_number_of_times() {
		let config = ServerConfig {
			greeting: "howdy".into(),
			greetings: 3,
			..ServerConfig::default()
		};
		let relay = Relay::new(&config);
		let input = relay.start_session(&login("ada")).unwrap();
		assert_eq!(input.blobs.len(), 3);
		assert_eq!(input.blobs[0].as_text(), Some("howdy, ada"));
		assert_eq!(relay.sessions().user(input.session_id).as_deref(), Some("ada"));
	}

	#[test]
	fn login_rejects_empty_user_and_bad_token() {
		let config = ServerConfig {
			token: Some("secret".into()),
			..ServerConfig::default()
		};
		let relay = Relay::new(&config);
		let status = relay.start_session(&login(" ")).unwrap_err();
		assert_eq!(status.code(), mondo_rpc::StatusCode::InvalidArgument);

		let status = relay.start_session(&login("ada")).unwrap_err();
		assert_eq!(status.code(), mondo_rpc::StatusCode::Unauthenticated);

		let request = LoginRequest {
			user: "ada".into(),
			token: Some("secret".into()),
		};
		assert!(relay.start_session(&request).is_ok());
	}

	#[test]
	fn blobs_reach_every_other_session_once() {
		let relay = relay();
		let a = relay.start_session(&login("a")).unwrap().session_id;
		let b = relay.start_session(&login("b")).unwrap().session_id;
		let c = relay.start_session(&login("c")).unwrap().session_id;

		let sent = vec![Blob::text("chat", "hi")];
		let out = relay.poll_in_out(Input {
			session_id: a,
			blobs: sent.clone(),
		});
		assert!(out.blobs.is_empty());
		assert_eq!(out.error, None);

		for session in [b, c] {
			let out = relay.poll_in_out(Input {
				session_id: session,
				blobs: Vec::new(),
			});
			assert_eq!(out.blobs, sent);
		}
		assert!(relay.exchange().take(b).is_empty());
	}

	#[test]
	fn unknown_or_ended_session_reports_error() {
		let relay = relay();
		let id = relay.start_session(&login("a")).unwrap().session_id;
		assert!(relay.end_session(id));
		assert!(!relay.end_session(id));

		let out = relay.poll_in_out(Input {
			session_id: id,
			blobs: vec![Blob::text("chat", "lost")],
		});
		assert!(out.error.is_some());
		assert!(relay.sessions().is_empty());
	}

	#[test]
	fn idle_sessions_expire_with_their_mailboxes() {
		let relay = Relay::new(&ServerConfig {
			session_idle_secs: 60,
			..ServerConfig::default()
		});
		let active = relay.start_session(&login("active")).unwrap().session_id;
		let silent = relay.start_session(&login("silent")).unwrap().session_id;
		relay.poll_in_out(Input {
			session_id: active,
			blobs: vec![Blob::text("chat", "anyone?")],
		});
		assert_eq!(relay.exchange().pending(silent), 1);

		let t0 = Instant::now();
		assert!(relay.sessions().touch(active, t0 + Duration::from_secs(50)));
		assert_eq!(relay.expire_idle(t0 + Duration::from_secs(30)), 0);
		assert_eq!(relay.expire_idle(t0 + Duration::from_secs(70)), 1);

		assert!(relay.sessions().validate(active));
		assert!(!relay.sessions().validate(silent));
		assert_eq!(relay.exchange().pending(silent), 0);
		let out = relay.poll_in_out(Input {
			session_id: silent,
			blobs: Vec::new(),
		});
		assert!(out.error.is_some());
	}

	#[test]
	fn zero_idle_never_expires() {
		let relay = Relay::new(&ServerConfig {
			session_idle_secs: 0,
			..ServerConfig::default()
		});
		relay.start_session(&login("a")).unwrap();
		assert_eq!(relay.expire_idle(Instant::now() + Duration::from_secs(86_400)), 0);
		assert_eq!(relay.sessions().len(), 1);
	}

	#[test]
	fn mailboxes_of_silent_sessions_stay_bounded() {
		let relay = Relay::new(&ServerConfig {
			mailbox_limit: 3,
			..ServerConfig::default()
		});
		let talker = relay.start_session(&login("talker")).unwrap().session_id;
		let silent: Vec<_> = (0..10)
			.map(|i| relay.start_session(&login(&format!("silent{i}"))).unwrap().session_id)
			.collect();

		for i in 0..100 {
			relay.poll_in_out(Input {
				session_id: talker,
				blobs: vec![Blob::text("chat", &format!("m{i}"))],
			});
		}

		for id in &silent {
			assert_eq!(relay.exchange().pending(*id), 3);
		}
		let newest: Vec<_> = relay.exchange().take(silent[0]).iter().filter_map(|b| b.as_text().map(str::to_owned)).collect();
		assert_eq!(newest, vec!["m97", "m98", "m99"]);
	}
}
