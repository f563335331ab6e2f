#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use bmcmon_exporter::app::{build_app, AppState};
use bmcmon_exporter::mapper::{GcPolicy, Mapper};
use bmcmon_session::{
    ChassisState, Closer, DeviceInfo, PowerReading, Provider, ProviderError, SdrRepository,
    SensorReading, Session, SessionError, SessionHandle,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::util::ServiceExt;

/// Observes how many session commands run at once; the per-target event
/// loop must keep this at one.
#[derive(Default)]
pub struct InFlight {
    current: AtomicUsize,
    pub max: AtomicUsize,
}

impl InFlight {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct SessionFlags {
    pub session_closed: AtomicBool,
    pub closer_closed: AtomicBool,
}

/// Provider handing out identical healthy sessions for a fixed set of known
/// addresses. Commands optionally stall to simulate a slow BMC.
pub struct MockProvider {
    known: HashSet<String>,
    pub requests: AtomicUsize,
    pub flags: Mutex<Vec<Arc<SessionFlags>>>,
    pub in_flight: Arc<InFlight>,
    command_delay: Duration,
}

impl MockProvider {
    pub fn new(addrs: &[&str]) -> Arc<Self> {
        Self::with_delay(addrs, Duration::ZERO)
    }

    pub fn with_delay(addrs: &[&str], command_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            known: addrs.iter().map(|a| a.to_string()).collect(),
            requests: AtomicUsize::new(0),
            flags: Mutex::new(Vec::new()),
            in_flight: Arc::new(InFlight::default()),
            command_delay,
        })
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn session_flags(&self, index: usize) -> Arc<SessionFlags> {
        self.flags.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn session(&self, addr: &str) -> Result<SessionHandle, ProviderError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if !self.known.contains(addr) {
            return Err(ProviderError::CredentialNotFound {
                addr: addr.to_string(),
            });
        }
        let flags = Arc::new(SessionFlags::default());
        self.flags.lock().unwrap().push(flags.clone());
        Ok(SessionHandle {
            session: Box::new(MockSession {
                delay: self.command_delay,
                in_flight: Arc::clone(&self.in_flight),
                flags: flags.clone(),
            }),
            closer: Box::new(MockCloser { flags }),
        })
    }
}

pub struct MockSession {
    delay: Duration,
    in_flight: Arc<InFlight>,
    flags: Arc<SessionFlags>,
}

impl MockSession {
    async fn command(&self) {
        self.in_flight.enter();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.exit();
    }
}

#[async_trait]
impl Session for MockSession {
    fn ipmi_version(&self) -> &'static str {
        "2.0"
    }

    async fn system_guid(&mut self) -> Result<[u8; 16], SessionError> {
        self.command().await;
        Ok([0xab; 16])
    }

    async fn device_id(&mut self) -> Result<DeviceInfo, SessionError> {
        self.command().await;
        Ok(DeviceInfo {
            firmware_major: 1,
            firmware_minor: 0x23,
        })
    }

    async fn chassis_status(&mut self) -> Result<ChassisState, SessionError> {
        self.command().await;
        Ok(ChassisState {
            powered_on: true,
            ..ChassisState::default()
        })
    }

    async fn power_reading(&mut self) -> Result<PowerReading, SessionError> {
        self.command().await;
        Ok(PowerReading {
            active: true,
            watts: 242,
        })
    }

    async fn sensor_reading(&mut self, _sensor: u8) -> Result<SensorReading, SessionError> {
        self.command().await;
        Ok(SensorReading {
            raw: 0,
            available: false,
        })
    }

    async fn sdr_repository(&mut self) -> Result<SdrRepository, SessionError> {
        self.command().await;
        Ok(SdrRepository::default())
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.flags.session_closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MockCloser {
    flags: Arc<SessionFlags>,
}

impl Closer for MockCloser {
    fn close(&mut self) {
        self.flags.closer_closed.store(true, Ordering::SeqCst);
    }
}

pub struct TestContext {
    pub provider: Arc<MockProvider>,
    pub mapper: Arc<Mapper>,
    pub app: Router,
}

pub fn build_context(provider: Arc<MockProvider>) -> TestContext {
    build_context_with_policy(provider, GcPolicy::default())
}

pub fn build_context_with_policy(provider: Arc<MockProvider>, policy: GcPolicy) -> TestContext {
    bmcmon_exporter::metrics::init();
    let mapper = Arc::new(Mapper::with_policy(
        provider.clone(),
        Duration::from_secs(8),
        policy,
    ));
    let app = build_app(AppState {
        mapper: Arc::clone(&mapper),
        scrape_timeout: Duration::from_secs(8),
    });
    TestContext {
        provider,
        mapper,
        app,
    }
}

pub async fn get(app: &Router, uri: &str) -> (StatusCode, String) {
    get_with_headers(app, uri, &[]).await
}

pub async fn get_with_headers(
    app: &Router,
    uri: &str,
    headers: &[(&str, &str)],
) -> (StatusCode, String) {
    let mut request = Request::builder().uri(uri);
    for (name, value) in headers {
        request = request.header(*name, *value);
    }
    let response = app
        .clone()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8_lossy(&body).into_owned())
}

/// The value of a plain (unlabelled) sample in an exposition body.
pub fn sample_value(body: &str, name: &str) -> Option<f64> {
    body.lines()
        .find(|line| line.starts_with(name) && line.as_bytes().get(name.len()) == Some(&b' '))
        .and_then(|line| line[name.len() + 1..].trim().parse().ok())
}

/// How many samples of a family the body carries (HELP/TYPE lines excluded).
pub fn sample_count(body: &str, name: &str) -> usize {
    body.lines()
        .filter(|line| {
            line.starts_with(name)
                && matches!(line.as_bytes().get(name.len()), Some(&b' ') | Some(&b'{'))
        })
        .count()
}
