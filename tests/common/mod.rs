//! Shared utilities for integration tests.

use std::time::Duration;

use config_binder::{AccessDispatcher, ConfigResult, MemberDescriptor, TargetDescriptor, TypeTag};

/// Poll `check` until it holds or `timeout` elapses. Returns the last result.
pub async fn wait_until<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Accessor-style service configuration used across the tests.
pub fn service_target() -> TargetDescriptor {
    TargetDescriptor::accessors()
        .read_write(MemberDescriptor::getter("hostname", TypeTag::String))
        .member(MemberDescriptor::getter("port", TypeTag::Integer).default_value("8080"))
        .member(MemberDescriptor::getter("verbose", TypeTag::Bool).path("logging/verbose"))
}

/// Hand-written typed accessors over the generic dispatcher.
#[allow(dead_code)]
pub trait ServiceConfig {
    fn hostname(&self) -> ConfigResult<Option<String>>;
    fn set_hostname(&self, hostname: &str) -> ConfigResult<()>;
    fn port(&self) -> ConfigResult<u16>;
    fn verbose(&self) -> ConfigResult<bool>;
}

impl ServiceConfig for AccessDispatcher {
    fn hostname(&self) -> ConfigResult<Option<String>> {
        self.get_as("hostname")
    }

    fn set_hostname(&self, hostname: &str) -> ConfigResult<()> {
        self.set_as("hostname", hostname)
    }

    fn port(&self) -> ConfigResult<u16> {
        self.get_as("port")
    }

    fn verbose(&self) -> ConfigResult<bool> {
        self.get_as("verbose")
    }
}
