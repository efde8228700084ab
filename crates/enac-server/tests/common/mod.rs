//! Shared fixtures: self-signed credentials and listener contexts.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use enac_server::config::ShutdownPolicy;
use enac_server::content;
use enac_server::credentials::Credentials;
use enac_server::listener::{ListenerContext, ListenerState};
use enac_transport::ackhandler::CongestionControllerFactory;
use enac_transport::congestion::CongestionOptions;
use rustls::pki_types::CertificateDer;
use tokio::sync::watch;

pub struct TestCredentials {
    pub credentials: Arc<Credentials>,
    pub cert_der: CertificateDer<'static>,
    _dir: tempfile::TempDir,
}

pub fn credentials() -> TestCredentials {
    let generated = rcgen::generate_simple_self_signed(vec!["localhost".into()]).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let cert_path = dir.path().join("cert.pem");
    let key_path = dir.path().join("key.pem");
    std::fs::write(&cert_path, generated.cert.pem()).unwrap();
    std::fs::write(&key_path, generated.key_pair.serialize_pem()).unwrap();
    TestCredentials {
        credentials: Arc::new(Credentials::load(&cert_path, &key_path).unwrap()),
        cert_der: generated.cert.der().clone(),
        _dir: dir,
    }
}

pub fn context(credentials: &TestCredentials, options: CongestionOptions) -> ListenerContext {
    ListenerContext::new(
        credentials.credentials.clone(),
        content::router(None),
        Arc::new(CongestionControllerFactory::new(options)),
        ShutdownPolicy::default(),
    )
}

/// Wait until the listener is serving (its address) or has terminated.
pub async fn settled(rx: &mut watch::Receiver<ListenerState>) -> ListenerState {
    let state = tokio::time::timeout(
        Duration::from_secs(10),
        rx.wait_for(|s| matches!(s, ListenerState::Serving(_)) || s.is_terminal()),
    )
    .await
    .expect("listener did not settle")
    .expect("listener state channel closed");
    *state
}

pub fn serving_addr(state: ListenerState) -> SocketAddr {
    match state {
        ListenerState::Serving(addr) => addr,
        other => panic!("listener is {other}, not serving"),
    }
}

pub fn client_roots(credentials: &TestCredentials) -> rustls::RootCertStore {
    let mut roots = rustls::RootCertStore::empty();
    roots.add(credentials.cert_der.clone()).unwrap();
    roots
}
