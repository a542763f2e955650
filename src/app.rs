//! Application root
//!
//! Owns the UI loop, the event notifier and the background runner. Front
//! ends (the CLI here, a window elsewhere) submit work through it and pump
//! the UI loop to receive results.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::AppConfig;
use crate::notifier::{Notifier, Subscription};
use crate::runner::{BackgroundRunner, Event, JobHandle};
use crate::ui_loop::UiLoop;

pub struct App {
    config: AppConfig,
    ui: UiLoop,
    notifier: Notifier<Event>,
    runner: BackgroundRunner,
}

impl App {
    pub fn new(config: AppConfig) -> Result<Self, String> {
        let ui = UiLoop::new();
        let notifier = Notifier::new();
        let runner = BackgroundRunner::new(&config, ui.handle(), notifier.clone())?;
        Ok(Self {
            config,
            ui,
            notifier,
            runner,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn ui(&self) -> &UiLoop {
        &self.ui
    }

    pub fn notifier(&self) -> &Notifier<Event> {
        &self.notifier
    }

    pub fn runner(&self) -> &BackgroundRunner {
        &self.runner
    }

    /// Submit one job and pump the UI loop until its event arrives on `channel`
    ///
    /// Events for other jobs on the same channel are ignored. If `wait`
    /// elapses first the job is cancelled and `None` is returned.
    pub fn run_to_completion<F>(&self, channel: &str, submit: F, wait: Duration) -> Option<Event>
    where
        F: FnOnce(&BackgroundRunner) -> JobHandle,
    {
        let received: Arc<Mutex<Vec<Event>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let subscription: Subscription = self.notifier.subscribe(channel, move |event: &Event| {
            sink.lock().unwrap_or_else(|e| e.into_inner()).push(event.clone());
        });

        let handle = submit(&self.runner);
        let id = handle.id();
        let take = || {
            let mut events = received.lock().unwrap_or_else(|e| e.into_inner());
            events
                .iter()
                .position(|e| e.job_id() == id)
                .map(|pos| events.remove(pos))
        };

        let mut event = None;
        let arrived = self.ui.run_until(
            || {
                if event.is_none() {
                    event = take();
                }
                event.is_some()
            },
            wait,
        );
        subscription.unsubscribe();

        if !arrived {
            log::warn!("[{}] no result after {:?}, cancelling", id, wait);
            handle.cancel();
        }
        event
    }

    /// Cancel outstanding work and stop the worker threads
    pub fn shutdown(self) {
        self.runner.shutdown();
    }
}
