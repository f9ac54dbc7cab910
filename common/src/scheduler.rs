use tracing::warn;

pub type TaskResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;
type TaskAction<C> = Box<dyn FnMut(&mut C) -> TaskResult + Send>;

pub struct ScheduledTask<C> {
    name: &'static str,
    interval_ms: u64,
    last_run_ms: Option<u64>,
    run_count: u64,
    error_count: u64,
    action: TaskAction<C>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStats {
    pub name: &'static str,
    pub run_count: u64,
    pub error_count: u64,
}

/// Cooperative, single-threaded task runner.
///
/// Tasks fire in registration order; a task that has never run is due on the
/// first tick. `last_run_ms` advances whether or not the action succeeded,
/// and a failing action never stops later tasks in the same tick; the error
/// is captured and logged per task.
pub struct Scheduler<C> {
    tasks: Vec<ScheduledTask<C>>,
    started: bool,
}

impl<C> Default for Scheduler<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Scheduler<C> {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            started: false,
        }
    }

    /// Add a task. Registration is only legal before the first tick; the
    /// collection is append-only after startup.
    pub fn register<F>(&mut self, name: &'static str, interval_ms: u64, action: F)
    where
        F: FnMut(&mut C) -> TaskResult + Send + 'static,
    {
        assert!(
            !self.started,
            "tasks must be registered before the run loop starts"
        );
        self.tasks.push(ScheduledTask {
            name,
            interval_ms,
            last_run_ms: None,
            run_count: 0,
            error_count: 0,
            action: Box::new(action),
        });
    }

    /// Run every due task once. Returns how many tasks fired.
    pub fn tick(&mut self, now_ms: u64, ctx: &mut C) -> usize {
        self.started = true;
        let mut fired = 0;

        for task in &mut self.tasks {
            let due = match task.last_run_ms {
                Some(last) => now_ms.saturating_sub(last) >= task.interval_ms,
                None => true,
            };
            if !due {
                continue;
            }

            match (task.action)(ctx) {
                Ok(()) => task.run_count += 1,
                Err(err) => {
                    task.error_count += 1;
                    warn!("task '{}' failed: {err}", task.name);
                }
            }
            task.last_run_ms = Some(now_ms);
            fired += 1;
        }

        fired
    }

    pub fn stats(&self) -> Vec<TaskStats> {
        self.tasks
            .iter()
            .map(|task| TaskStats {
                name: task.name,
                run_count: task.run_count,
                error_count: task.error_count,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct TraceCtx {
        calls: Vec<&'static str>,
    }

    #[test]
    fn due_tasks_fire_in_registration_order() {
        let mut scheduler: Scheduler<TraceCtx> = Scheduler::new();
        scheduler.register("b-second", 100, |ctx| {
            ctx.calls.push("b-second");
            Ok(())
        });
        scheduler.register("a-first", 100, |ctx| {
            ctx.calls.push("a-first");
            Ok(())
        });

        let mut ctx = TraceCtx::default();
        scheduler.tick(0, &mut ctx);

        assert_eq!(ctx.calls, vec!["b-second", "a-first"]);
    }

    #[test]
    fn tasks_respect_their_intervals() {
        let mut scheduler: Scheduler<TraceCtx> = Scheduler::new();
        scheduler.register("fast", 100, |ctx| {
            ctx.calls.push("fast");
            Ok(())
        });
        scheduler.register("slow", 1_000, |ctx| {
            ctx.calls.push("slow");
            Ok(())
        });

        let mut ctx = TraceCtx::default();
        scheduler.tick(0, &mut ctx); // both due on first tick
        scheduler.tick(100, &mut ctx); // only fast
        scheduler.tick(150, &mut ctx); // neither
        scheduler.tick(1_000, &mut ctx); // both

        assert_eq!(ctx.calls, vec!["fast", "slow", "fast", "fast", "slow"]);
    }

    #[test]
    fn failure_is_isolated_and_later_tasks_still_run() {
        let mut scheduler: Scheduler<TraceCtx> = Scheduler::new();
        scheduler.register("broken", 100, |_ctx| Err("boom".into()));
        scheduler.register("after", 100, |ctx| {
            ctx.calls.push("after");
            Ok(())
        });

        let mut ctx = TraceCtx::default();
        scheduler.tick(0, &mut ctx);
        // last_run advanced despite the failure, so the broken task is not
        // retried before its interval.
        scheduler.tick(50, &mut ctx);
        scheduler.tick(100, &mut ctx);

        assert_eq!(ctx.calls, vec!["after", "after"]);
        let stats = scheduler.stats();
        assert_eq!(stats[0].error_count, 2);
        assert_eq!(stats[0].run_count, 0);
        assert_eq!(stats[1].run_count, 2);
    }

    #[test]
    #[should_panic(expected = "before the run loop starts")]
    fn registration_after_start_is_rejected() {
        let mut scheduler: Scheduler<TraceCtx> = Scheduler::new();
        scheduler.register("only", 100, |_ctx| Ok(()));
        let mut ctx = TraceCtx::default();
        scheduler.tick(0, &mut ctx);
        scheduler.register("late", 100, |_ctx| Ok(()));
    }
}
