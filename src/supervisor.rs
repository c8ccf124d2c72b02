use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::sleep;
use tracing::{error, info, trace, warn};

use crate::commands::CommandSource;
use crate::config::AppConfig;
use crate::errors::SvcgroupError;
use crate::ipc::{self, ProcessCommands, SUPERVISOR_INDEX};
use crate::launcher::Launcher;
use crate::lifecycle::{Lifecycle, LifecycleListener, State};
use crate::process::{ProcessHandle, ProcessStatus};
use crate::watcher::Watcher;

/// Poll interval while waiting for a single process to stop.
const STOP_POLL: Duration = Duration::from_millis(10);
/// Poll interval while waiting for the group to become operational.
const OPERATIONAL_POLL: Duration = Duration::from_millis(50);

/// Orchestrates one group of child service processes: fetches specs from the
/// [`CommandSource`], launches them in order, tracks them through per-process
/// watchers, and drives graceful stop, hard stop and restart cycles through
/// the single [`Lifecycle`] it owns.
pub struct Supervisor {
    config: AppConfig,
    source: Arc<dyn CommandSource>,
    launcher: Launcher,
    lifecycle: Lifecycle,
    /// Append-only during a cycle, wholesale-cleared once a full stop
    /// completed. Concurrently read by the restart watcher and the stop path.
    watchers: Mutex<Vec<Watcher>>,
    /// Serializes teardowns: a stop requested while another stop is underway
    /// blocks until the first one finished instead of racing it.
    stop_lock: AsyncMutex<()>,
    restart_watcher_started: AtomicBool,
    hard_stop_watcher_started: AtomicBool,
    last_failure: Mutex<Option<String>>,
}

impl Supervisor {
    pub fn new(
        config: AppConfig,
        source: Arc<dyn CommandSource>,
        listeners: Vec<Box<dyn LifecycleListener>>,
    ) -> Self {
        let launcher = Launcher::new(&config);
        Self {
            config,
            source,
            launcher,
            lifecycle: Lifecycle::new(listeners),
            watchers: Mutex::new(Vec::new()),
            stop_lock: AsyncMutex::new(()),
            restart_watcher_started: AtomicBool::new(false),
            hard_stop_watcher_started: AtomicBool::new(false),
            last_failure: Mutex::new(None),
        }
    }

    pub fn lifecycle_state(&self) -> State {
        self.lifecycle.state()
    }

    /// Reason the last start/restart cycle failed, if any.
    pub fn last_failure(&self) -> Option<String> {
        self.last_failure
            .lock()
            .expect("failure lock poisoned")
            .clone()
    }

    /// Starts the process group. A no-op unless the lifecycle can move to
    /// `starting` (fresh supervisor or restart cycle), so concurrent or
    /// repeated calls cannot start two overlapping groups.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.start_processes().await
    }

    async fn start_processes(self: &Arc<Self>) -> Result<()> {
        if !self.lifecycle.try_to_move_to(State::Starting) {
            trace!(
                "ignoring start request while lifecycle is {}",
                self.lifecycle.state()
            );
            return Ok(());
        }
        *self.last_failure.lock().expect("failure lock poisoned") = None;

        if let Err(err) = self.prepare_shared_area() {
            return self.fail_start(err).await;
        }
        self.ensure_hard_stop_watcher();
        self.ensure_restart_watcher();

        let specs = match self.source.fetch() {
            Ok(specs) => specs,
            Err(err) => return self.fail_start(err).await,
        };

        info!("starting process group of {} processes", specs.len());
        for spec in &specs {
            let launched = match self.launcher.launch(spec) {
                Ok(launched) => launched,
                // partial groups are never left running
                Err(err) => return self.fail_start(err).await,
            };
            let supervisor = Arc::clone(self);
            let watcher = Watcher::spawn(launched.handle, launched.child, move |crashed| {
                supervisor.on_child_crash(crashed);
            });
            self.watchers
                .lock()
                .expect("watcher set lock poisoned")
                .push(watcher);
        }

        if !self.lifecycle.try_to_move_to(State::Started) {
            // a stop won the lifecycle during the launch phase; the stopping
            // side owns the teardown of whatever we launched
            return Ok(());
        }

        match self.wait_for_operational().await {
            Ok(()) => {
                if self.lifecycle.try_to_move_to(State::Operational) {
                    info!("process group is operational");
                }
                Ok(())
            }
            Err(err) => self.fail_start(err).await,
        }
    }

    /// Clears stale signal flags from a previous run and re-creates the
    /// supervisor's own record (the hard-stop channel).
    fn prepare_shared_area(&self) -> Result<()> {
        ipc::reset_dir(&self.config.shared_dir)?;
        ProcessCommands::new(&self.config.shared_dir, SUPERVISOR_INDEX)?;
        Ok(())
    }

    /// Fails the current cycle: records the reason, tears down whatever was
    /// already launched and surfaces the error to the caller.
    async fn fail_start(&self, err: anyhow::Error) -> Result<()> {
        error!("process group failed to start: {err}");
        *self.last_failure.lock().expect("failure lock poisoned") = Some(err.to_string());

        let _ = self.lifecycle.try_to_move_to(State::Stopping);
        self.stop_processes(true).await;
        self.lifecycle.try_to_move_to(State::Stopped);
        Err(err)
    }

    /// Invoked from a watcher task when a child exits without a stop request.
    /// Records the crash and escalates to a hard stop of the whole group; a
    /// crash during the launch phase leaves the escalation to the start path,
    /// which reports it through [`Supervisor::fail_start`].
    fn on_child_crash(self: &Arc<Self>, handle: &ProcessHandle) {
        *self.last_failure.lock().expect("failure lock poisoned") =
            Some(format!("process [{}] exited unexpectedly", handle.key()));
        self.stop_async(true);
    }

    /// Blocks until every process reported operational through its signal
    /// record, a process crashed, or the global startup timeout elapsed.
    async fn wait_for_operational(&self) -> Result<()> {
        let timeout_secs = self.config.startup_timeout.as_secs();
        let deadline = Instant::now() + self.config.startup_timeout;
        loop {
            if self.lifecycle.state() != State::Started {
                // a stop or a crash escalation took over the lifecycle
                // mid-wait; only a recorded failure makes that an error
                return match self.last_failure() {
                    Some(reason) => Err(anyhow!(reason)),
                    None => Ok(()),
                };
            }
            let mut all_operational = true;
            for handle in self.snapshot_handles() {
                if handle.is_stopped() {
                    if handle.stop_was_requested() {
                        // a concurrent teardown owns this process
                        return Ok(());
                    }
                    return Err(SvcgroupError::ChildCrash(handle.key().to_string()).into());
                }
                if handle.status() < ProcessStatus::Operational {
                    if handle.commands().is_operational() {
                        handle.advance_to(ProcessStatus::Operational);
                        info!("process {handle} is operational");
                    } else {
                        all_operational = false;
                    }
                }
            }
            if all_operational {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(SvcgroupError::StartupTimeout(timeout_secs).into());
            }
            sleep(OPERATIONAL_POLL).await;
        }
    }

    /// Synchronous stop used by the shutdown path (termination signal) and
    /// the hard-stop watcher. Blocks until every child is down; does not rely
    /// on any background task still being alive.
    pub async fn stop(&self) {
        let moved = self.lifecycle.try_to_move_to(State::HardStopping)
            || self.lifecycle.try_to_move_to(State::Stopping);
        if moved {
            info!("stopping process group");
        }
        self.stop_processes(false).await;
        self.lifecycle.try_to_move_to(State::Stopped);
    }

    /// Requests a stop without blocking. Only the caller that wins the
    /// lifecycle transition spawns the terminator task; every other call is a
    /// cheap no-op.
    pub fn stop_async(self: &Arc<Self>, hard: bool) {
        let target = if hard {
            State::HardStopping
        } else {
            State::Stopping
        };
        if self.lifecycle.try_to_move_to(target) {
            let supervisor = Arc::clone(self);
            tokio::spawn(async move {
                supervisor.stop_processes(!hard).await;
                supervisor.lifecycle.try_to_move_to(State::Stopped);
            });
        }
    }

    /// Requests a restart of the whole group. The winner of the lifecycle
    /// transition stops every child in reverse order, then runs a fresh start
    /// cycle against re-fetched specs. A failure during that start escalates
    /// to a hard stop instead of leaving a half-started group behind. Returns
    /// whether this call won the transition.
    pub fn restart_async(self: &Arc<Self>) -> bool {
        if !self.lifecycle.try_to_move_to(State::Restarting) {
            return false;
        }
        info!("restarting process group");
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            supervisor.stop_processes(true).await;
            if let Err(err) = supervisor.start_processes().await {
                error!("restart failed: {err}");
                supervisor.stop_async(true);
            }
        });
        true
    }

    /// Stops every process in the reverse of start order, escalating from a
    /// graceful stop request to a kill once the termination timeout elapsed.
    /// Once entered, teardown always runs to completion.
    async fn stop_processes(&self, graceful: bool) {
        let _guard = self.stop_lock.lock().await;

        // snapshot then reverse, so concurrent appends from an earlier cycle
        // cannot disturb an in-progress teardown
        let mut handles = self.snapshot_handles();
        handles.reverse();

        for handle in handles {
            if handle.is_stopped() {
                continue;
            }
            if graceful {
                info!("process {handle} is stopping");
                if let Err(err) = handle.ask_for_graceful_stop() {
                    warn!("failed to ask process {handle} for a graceful stop: {err}");
                }
                let kill_at = Instant::now() + self.config.termination_timeout;
                while !handle.is_stopped() && Instant::now() < kill_at {
                    sleep(STOP_POLL).await;
                }
                if !handle.is_stopped() {
                    info!("process {handle} failed to stop in a timely fashion, killing it");
                }
            }
            handle.kill();
            while !handle.is_stopped() {
                sleep(STOP_POLL).await;
            }
            info!("process {handle} is stopped");
        }

        trace!("all processes stopped, clearing watcher set");
        self.watchers
            .lock()
            .expect("watcher set lock poisoned")
            .clear();
    }

    /// Blocks until the lifecycle reached its terminal state.
    pub async fn wait_until_stopped(&self) {
        while self.lifecycle.state() != State::Stopped {
            sleep(Duration::from_millis(20)).await;
        }
    }

    fn snapshot_handles(&self) -> Vec<Arc<ProcessHandle>> {
        self.watchers
            .lock()
            .expect("watcher set lock poisoned")
            .iter()
            .map(Watcher::handle)
            .collect()
    }

    /// Watches for any child requesting a restart of the whole group. Runs
    /// once per supervisor lifetime; polling is suppressed outside
    /// `started`/`operational` so an in-flight cycle is never re-triggered.
    fn ensure_restart_watcher(self: &Arc<Self>) {
        if self.restart_watcher_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let state = supervisor.lifecycle.state();
                if state == State::Stopped {
                    break;
                }
                if matches!(state, State::Started | State::Operational) {
                    if let Some(requester) = supervisor.restart_requester() {
                        // the flag stays raised until the restart transition
                        // actually wins, so a request observed before the
                        // group is operational is retried, not dropped
                        if supervisor.restart_async() {
                            info!("process {requester} requested a restart of the group");
                            if let Err(err) = requester.commands().acknowledge_ask_for_restart() {
                                warn!("failed to acknowledge restart request of {requester}: {err}");
                            }
                        }
                    }
                }
                sleep(supervisor.config.watch_delay).await;
            }
            trace!("restart watcher terminated");
        });
    }

    fn restart_requester(&self) -> Option<Arc<ProcessHandle>> {
        self.snapshot_handles()
            .into_iter()
            .find(|handle| handle.commands().asked_for_restart())
    }

    /// Watches the supervisor's own signal record for a stop request written
    /// by an external controller. Started at most once per supervisor
    /// lifetime, and only when enabled.
    fn ensure_hard_stop_watcher(self: &Arc<Self>) {
        if !self.config.enable_hard_stop {
            return;
        }
        if self.hard_stop_watcher_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            let commands =
                match ProcessCommands::new(&supervisor.config.shared_dir, SUPERVISOR_INDEX) {
                    Ok(commands) => commands,
                    Err(err) => {
                        error!("hard stop watcher could not open its signal record: {err}");
                        return;
                    }
                };
            while supervisor.lifecycle.state() != State::Stopped {
                if commands.asked_for_stop() {
                    info!("external controller requested a stop");
                    supervisor.stop().await;
                } else {
                    sleep(supervisor.config.watch_delay).await;
                }
            }
            trace!("hard stop watcher terminated");
        });
    }
}
