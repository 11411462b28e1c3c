//! Lifecycle events and the dependent subsystems a node starts and stops
//!
//! These are the hooks `NodeStateManager` drives, in a fixed order. The
//! subsystems themselves live elsewhere; only their control surface is here.

use crate::cluster::manager::IndexConsistencyCheck;
use crate::common::Result;
use std::time::Duration;

/// Published at fixed points of activation and deactivation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// Other processes should drop their view of shared caches
    ClearCache,
    NodeActivating,
    NodeActivated,
    NodePassivating,
    NodePassivated,
}

/// Synchronous observer, invoked in registration order
pub trait LifecycleListener: Send + Sync {
    fn on_event(&self, event: LifecycleEvent);
}

/// Shared cache layer
pub trait CacheControl: Send + Sync {
    /// Flush local caches synchronously
    fn flush(&self) -> Result<()>;
}

/// Scheduled-job trigger engine
pub trait SchedulerControl: Send + Sync {
    fn start(&self) -> Result<()>;

    /// Stop issuing new triggers; in-flight jobs run to completion
    fn standby(&self) -> Result<()>;
}

/// Background task manager
pub trait TaskManagerControl: Send + Sync {
    fn start(&self) -> Result<()>;

    /// Refuse new tasks and wait up to `timeout` for running ones.
    /// Returns false when the wait expired with tasks still running.
    fn shutdown_and_wait(&self, timeout: Duration) -> Result<bool>;
}

/// Outbound mail queue
pub trait MailQueueControl: Send + Sync {
    fn flush(&self) -> Result<()>;
}

/// Rendezvous with in-flight external-directory synchronization
pub trait DirectorySyncBarrier: Send + Sync {
    /// Returns false when `timeout` expired before the barrier opened
    fn await_barrier(&self, timeout: Duration) -> Result<bool>;
}

/// Stand-in for every subsystem when the host process wires none: each
/// hook only logs and succeeds immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedSubsystems;

impl LifecycleListener for DetachedSubsystems {
    fn on_event(&self, event: LifecycleEvent) {
        tracing::info!(?event, "lifecycle event");
    }
}

impl CacheControl for DetachedSubsystems {
    fn flush(&self) -> Result<()> {
        tracing::debug!("cache flush (detached)");
        Ok(())
    }
}

impl SchedulerControl for DetachedSubsystems {
    fn start(&self) -> Result<()> {
        tracing::debug!("scheduler start (detached)");
        Ok(())
    }

    fn standby(&self) -> Result<()> {
        tracing::debug!("scheduler standby (detached)");
        Ok(())
    }
}

impl TaskManagerControl for DetachedSubsystems {
    fn start(&self) -> Result<()> {
        tracing::debug!("task manager start (detached)");
        Ok(())
    }

    fn shutdown_and_wait(&self, _timeout: Duration) -> Result<bool> {
        tracing::debug!("task manager shutdown (detached)");
        Ok(true)
    }
}

impl MailQueueControl for DetachedSubsystems {
    fn flush(&self) -> Result<()> {
        tracing::debug!("mail queue flush (detached)");
        Ok(())
    }
}

impl DirectorySyncBarrier for DetachedSubsystems {
    fn await_barrier(&self, _timeout: Duration) -> Result<bool> {
        Ok(true)
    }
}

impl IndexConsistencyCheck for DetachedSubsystems {
    fn is_index_consistent(&self) -> Result<bool> {
        tracing::debug!("no index attached, reporting consistent");
        Ok(true)
    }
}
