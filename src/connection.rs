use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::automation::{AutomationDriver, BrowserSession, PageOptions};
use crate::config::Config;
use crate::error::ConnectionError;

/// Lifecycle of a [`ConnectionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unconnected,
    /// Zero-based attempt currently in flight.
    Connecting { attempt: u32 },
    Connected,
    Disconnected,
    /// All attempts of one `connect` call failed. Terminal.
    Failed,
}

/// Owns at most one browser session and the retry policy used to open it.
pub struct ConnectionManager {
    driver: Arc<dyn AutomationDriver>,
    max_attempts: u32,
    base_delay: Duration,
    probe_options: PageOptions,
    state: ConnectionState,
    session: Option<Arc<dyn BrowserSession>>,
}

impl ConnectionManager {
    pub fn new(driver: Arc<dyn AutomationDriver>, config: &Config, probe_options: PageOptions) -> Self {
        Self {
            driver,
            max_attempts: config.max_retries.max(1),
            base_delay: config.retry_delay,
            probe_options,
            state: ConnectionState::Unconnected,
            session: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Delay slept after the zero-based `attempt` fails.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Return the live session, opening one if needed.
    ///
    /// Retries up to the configured attempt count with `base_delay * 2^attempt`
    /// between attempts; no delay follows the final one.
    pub async fn connect(&mut self) -> Result<Arc<dyn BrowserSession>, ConnectionError> {
        if self.state == ConnectionState::Failed {
            return Err(ConnectionError::Terminal);
        }
        if let (ConnectionState::Connected, Some(session)) = (self.state, &self.session) {
            return Ok(Arc::clone(session));
        }

        let endpoint = self.driver.describe();
        let mut last_error = None;

        for attempt in 0..self.max_attempts {
            self.state = ConnectionState::Connecting { attempt };
            info!("Connecting to {} (attempt {}/{})", endpoint, attempt + 1, self.max_attempts);

            match self.driver.open_session().await {
                Ok(session) => {
                    let session: Arc<dyn BrowserSession> = Arc::from(session);
                    self.session = Some(Arc::clone(&session));
                    self.state = ConnectionState::Connected;
                    info!("Connected to {}", endpoint);
                    return Ok(session);
                }
                Err(e) => {
                    error!("Connection attempt {} failed: {}", attempt + 1, e);
                    last_error = Some(e);
                    if attempt + 1 < self.max_attempts {
                        let delay = self.backoff(attempt);
                        info!("Retrying in {:.1}s", delay.as_secs_f64());
                        sleep(delay).await;
                    }
                }
            }
        }

        self.state = ConnectionState::Failed;
        error!("Giving up on {} after {} attempt(s)", endpoint, self.max_attempts);
        Err(ConnectionError::Exhausted {
            attempts: self.max_attempts,
            last: last_error.unwrap_or_else(|| anyhow::anyhow!("no attempt was made")),
        })
    }

    /// Release the session if there is one. Idempotent; teardown errors are
    /// logged and swallowed.
    pub async fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            match session.close().await {
                Ok(()) => info!("Disconnected from {}", self.driver.describe()),
                Err(e) => warn!("Error while closing browser session: {}", e),
            }
        }
        if matches!(self.state, ConnectionState::Connected | ConnectionState::Connecting { .. }) {
            self.state = ConnectionState::Disconnected;
        }
    }

    /// Open a throwaway page, load `about:blank`, read its title, close it.
    /// Any failure, including failing to connect, yields `false`.
    pub async fn health_check(&mut self) -> bool {
        let session = match self.connect().await {
            Ok(session) => session,
            Err(e) => {
                error!("Health check could not connect: {}", e);
                return false;
            }
        };

        let page = match session.new_page(&self.probe_options).await {
            Ok(page) => page,
            Err(e) => {
                error!("Health check could not open a page: {}", e);
                return false;
            }
        };

        let probe = async {
            page.goto("about:blank").await?;
            page.title().await
        }
        .await;

        if let Err(e) = page.close().await {
            warn!("Health check page did not close cleanly: {}", e);
        }

        match probe {
            Ok(_) => {
                info!("Health check: OK");
                true
            }
            Err(e) => {
                error!("Health check failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{page_options, MockDriver, MockPage};
    use tokio::time::Instant;

    fn config(retries: u32) -> Config {
        Config {
            max_retries: retries,
            retry_delay: Duration::from_secs(1),
            ..Config::default()
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let driver = Arc::new(MockDriver::new(MockPage::empty()));
        let manager = ConnectionManager::new(driver, &config(3), page_options());
        assert_eq!(manager.backoff(0), Duration::from_secs(1));
        assert_eq!(manager.backoff(1), Duration::from_secs(2));
        assert_eq!(manager.backoff(2), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_retries_then_succeeds() {
        let driver = Arc::new(MockDriver::new(MockPage::empty()).failing_first(2));
        let mut manager = ConnectionManager::new(driver.clone(), &config(3), page_options());

        let started = Instant::now();
        manager.connect().await.unwrap();

        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(driver.attempts(), 3);
        // 1s after the first failure, 2s after the second.
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_exhaustion_is_terminal() {
        let driver = Arc::new(MockDriver::new(MockPage::empty()).failing_first(10));
        let mut manager = ConnectionManager::new(driver.clone(), &config(3), page_options());

        let started = Instant::now();
        let err = manager.connect().await.err().unwrap();
        assert!(matches!(err, ConnectionError::Exhausted { attempts: 3, .. }));
        assert_eq!(manager.state(), ConnectionState::Failed);
        assert_eq!(driver.attempts(), 3);
        // No sleep after the last attempt.
        assert_eq!(started.elapsed(), Duration::from_secs(3));

        let again = manager.connect().await.err().unwrap();
        assert!(matches!(again, ConnectionError::Terminal));
        assert_eq!(driver.attempts(), 3);
    }

    #[tokio::test]
    async fn test_connect_reuses_live_session() {
        let driver = Arc::new(MockDriver::new(MockPage::empty()));
        let mut manager = ConnectionManager::new(driver.clone(), &config(3), page_options());
        manager.connect().await.unwrap();
        manager.connect().await.unwrap();
        assert_eq!(driver.attempts(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent_and_swallows_errors() {
        let driver = Arc::new(MockDriver::new(MockPage::empty()).failing_close());
        let mut manager = ConnectionManager::new(driver.clone(), &config(1), page_options());

        manager.disconnect().await;
        assert_eq!(manager.state(), ConnectionState::Unconnected);

        manager.connect().await.unwrap();
        manager.disconnect().await;
        manager.disconnect().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(driver.close_calls(), 1);
    }

    #[tokio::test]
    async fn test_health_check() {
        let driver = Arc::new(MockDriver::new(MockPage::empty()));
        let mut manager = ConnectionManager::new(driver, &config(1), page_options());
        assert!(manager.health_check().await);
    }

    #[tokio::test]
    async fn test_health_check_false_when_unreachable() {
        let driver = Arc::new(MockDriver::new(MockPage::empty()).failing_first(5));
        let mut manager = ConnectionManager::new(driver, &config(2), page_options());
        assert!(!manager.health_check().await);
    }

    #[tokio::test]
    async fn test_health_check_false_when_page_broken() {
        let driver = Arc::new(MockDriver::new(MockPage::empty().broken_navigation()));
        let mut manager = ConnectionManager::new(driver, &config(1), page_options());
        assert!(!manager.health_check().await);
    }
}
