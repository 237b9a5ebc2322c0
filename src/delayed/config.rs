/*!
 * Delayer Configuration
 *
 * Thread naming for the dedicated and watcher threads of a delayer
 */

use crate::core::limits::{BLOCK_THREAD_NAME, UNSIG_THREAD_NAME, WATCHER_THREAD_PREFIX};
use crate::signals::Signal;

/// Delayer configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayerConfig {
    /// Name of the dedicated thread
    pub thread_name: &'static str,
    /// Watcher threads are named `<prefix>-<signal>`
    pub watcher_thread_prefix: &'static str,
}

impl Default for DelayerConfig {
    fn default() -> Self {
        Self::unsig()
    }
}

impl DelayerConfig {
    /// Defaults of the ignore-and-redeliver delayer
    pub const fn unsig() -> Self {
        Self {
            thread_name: UNSIG_THREAD_NAME,
            watcher_thread_prefix: WATCHER_THREAD_PREFIX,
        }
    }

    /// Defaults of the block-and-suspend delayer
    pub const fn block() -> Self {
        Self {
            thread_name: BLOCK_THREAD_NAME,
            watcher_thread_prefix: WATCHER_THREAD_PREFIX,
        }
    }

    /// Builder: rename the dedicated thread
    pub const fn with_thread_name(mut self, thread_name: &'static str) -> Self {
        self.thread_name = thread_name;
        self
    }

    /// Builder: change the watcher thread prefix
    pub const fn with_watcher_thread_prefix(mut self, prefix: &'static str) -> Self {
        self.watcher_thread_prefix = prefix;
        self
    }

    pub(crate) fn watcher_name(&self, signal: Signal) -> String {
        format!("{}-{}", self.watcher_thread_prefix, signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        assert_eq!(DelayerConfig::default(), DelayerConfig::unsig());
        assert_ne!(DelayerConfig::unsig().thread_name, DelayerConfig::block().thread_name);
    }

    #[test]
    fn test_watcher_name() {
        let config = DelayerConfig::block().with_watcher_thread_prefix("watch");
        assert_eq!(config.watcher_name(Signal::TERMINATED), "watch-SIGTERM");
    }
}
