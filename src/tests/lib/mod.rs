use crate::common::{logging, settings::LoggingSettings};
use ed25519_dalek::{Signer, SigningKey};
use tokio::time::{sleep, Duration};
use tracing_subscriber::filter::EnvFilter;

/// This function makes it easy to toggle logging in the tests. If
/// called, and if the `TEST_LOGS` environment variable is set, its
/// value is used as a filter for tracing. For instance, to have the
/// logs dumped during the tests one can do:
///
/// ```no_rust
/// TEST_LOGS=trace cargo test
/// ```
pub fn enable_logging() {
    if let Ok(filter) = ::std::env::var("TEST_LOGS") {
        // only the first test to get here installs the subscriber
        let _ = logging::configure(LoggingSettings {
            filter: EnvFilter::try_new(filter).unwrap(),
        });
    }
}

/// Sleep for the given amount of time, in milliseconds. Note that in
/// tokio tests, we MUST NOT call `::std::thread::sleep` because it
/// blocks the event loop.
pub async fn sleep_ms(ms: u64) {
    sleep(Duration::from_millis(ms)).await
}

/// Generate a new key pair. The public key is hex encoded.
pub fn keypair() -> (SigningKey, String) {
    let signing_key = SigningKey::from_bytes(&rand::random::<[u8; 32]>());
    let public_key = hex::encode(signing_key.verifying_key().as_bytes());
    (signing_key, public_key)
}

/// Sign `payload` and hex encode the signature.
pub fn sign(signing_key: &SigningKey, payload: &[u8]) -> String {
    hex::encode(signing_key.sign(payload).to_bytes())
}
