use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::time::{Instant, MissedTickBehavior};

use super::gateway::RequestGateway;
use super::tabs::{Tab, TabDescriptor};
use super::types::DashEvent;

const MIN_INTERVAL: Duration = Duration::from_millis(250);

struct AbortTaskOnDrop(tokio::task::AbortHandle);

impl Drop for AbortTaskOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct LiveTimer {
    descriptor: TabDescriptor,
    generation: u64,
    _task: AbortTaskOnDrop,
}

/// Owns the one polling timer of the dashboard.
///
/// The timer task only emits [`DashEvent::Tick`]; the event loop hands the
/// tick back through [`RefreshScheduler::on_tick`], which fetches only if the
/// tick belongs to the live timer.
pub struct RefreshScheduler {
    gateway: RequestGateway,
    events: UnboundedSender<DashEvent>,
    live: Option<LiveTimer>,
    generation: u64,
}

impl RefreshScheduler {
    pub fn new(gateway: RequestGateway, events: UnboundedSender<DashEvent>) -> Self {
        Self {
            gateway,
            events,
            live: None,
            generation: 0,
        }
    }

    /// Cancels the running timer, fetches once right away and arms a new
    /// timer for `descriptor`.
    pub fn activate(&mut self, descriptor: TabDescriptor) {
        self.deactivate();
        self.generation += 1;
        let generation = self.generation;
        let period = descriptor.interval.max(MIN_INTERVAL);
        log::info!(
            "polling {} every {:?} (timer {generation})",
            descriptor.tab.title(),
            period
        );

        self.fetch(&descriptor, generation);

        let tab = descriptor.tab;
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if events.send(DashEvent::Tick { tab, generation }).is_err() {
                    break;
                }
            }
        });
        self.live = Some(LiveTimer {
            descriptor,
            generation,
            _task: AbortTaskOnDrop(task.abort_handle()),
        });
    }

    /// Idempotent; returns whether a timer was running.
    pub fn deactivate(&mut self) -> bool {
        match self.live.take() {
            Some(timer) => {
                log::debug!("cancelled timer {}", timer.generation);
                true
            }
            None => false,
        }
    }

    /// Fetches for a tick of the live timer; stale ticks are dropped.
    pub fn on_tick(&self, tab: Tab, generation: u64) -> bool {
        match &self.live {
            Some(timer) if timer.generation == generation && timer.descriptor.tab == tab => {
                self.fetch(&timer.descriptor, generation);
                true
            }
            _ => {
                log::trace!("ignoring stale tick of timer {generation}");
                false
            }
        }
    }

    /// One fetch without touching the timer, e.g. while refresh is paused.
    pub fn fetch_once(&mut self, descriptor: &TabDescriptor) {
        self.generation += 1;
        self.fetch(descriptor, self.generation);
    }

    /// Immediate extra fetch for the live tab, e.g. after an add.
    pub fn refresh_now(&self) -> bool {
        match &self.live {
            Some(timer) => {
                self.fetch(&timer.descriptor, timer.generation);
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.live.is_some()
    }

    /// Tab and generation of the one live timer, if any.
    pub fn live_timer(&self) -> Option<(Tab, u64)> {
        self.live
            .as_ref()
            .map(|timer| (timer.descriptor.tab, timer.generation))
    }

    pub fn interval(&self) -> Option<Duration> {
        self.live
            .as_ref()
            .map(|timer| timer.descriptor.interval.max(MIN_INTERVAL))
    }

    fn fetch(&self, descriptor: &TabDescriptor, generation: u64) {
        let tab = descriptor.tab;
        let ok_events = self.events.clone();
        let err_events = self.events.clone();
        self.gateway.request(
            descriptor.request.clone(),
            move |payload| {
                let _ = ok_events.send(DashEvent::Fetched {
                    tab,
                    generation,
                    result: Ok(payload),
                });
            },
            move |err| {
                let _ = err_events.send(DashEvent::Fetched {
                    tab,
                    generation,
                    result: Err(err),
                });
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::gateway::Method;
    use crate::app::gateway::testing::ScriptedTransport;
    use crate::app::tabs::{DashSettings, LogFilter};
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn settings() -> DashSettings {
        DashSettings {
            interval: Duration::from_secs(1),
            page_size: 25,
            log: LogFilter::default(),
        }
    }

    /// Plays the event loop's part: routes ticks back into the scheduler.
    fn pump(scheduler: &RefreshScheduler, rx: &mut UnboundedReceiver<DashEvent>) -> usize {
        let mut fetched = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                DashEvent::Tick { tab, generation } => {
                    scheduler.on_tick(tab, generation);
                }
                DashEvent::Fetched { .. } => fetched += 1,
                _ => {}
            }
        }
        fetched
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn switching_tabs_leaves_one_live_timer() {
        let transport = ScriptedTransport::new();
        let gateway = RequestGateway::new(transport.clone(), None);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = RefreshScheduler::new(gateway, tx);

        scheduler.activate(TabDescriptor::for_tab(Tab::Topics, &settings()));
        scheduler.activate(TabDescriptor::for_tab(Tab::Subscribers, &settings()));
        assert_eq!(scheduler.live_timer().map(|(tab, _)| tab), Some(Tab::Subscribers));

        for _ in 0..7 {
            tokio::time::sleep(Duration::from_millis(500)).await;
            pump(&scheduler, &mut rx);
            settle().await;
        }
        pump(&scheduler, &mut rx);
        settle().await;

        assert_eq!(transport.count(Method::Get, "topics/get/all"), 1);
        assert_eq!(transport.count(Method::Get, "subscriber/get/all"), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn deactivate_is_idempotent_and_drops_stale_ticks() {
        let transport = ScriptedTransport::new();
        let gateway = RequestGateway::new(transport.clone(), None);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = RefreshScheduler::new(gateway, tx);

        scheduler.activate(TabDescriptor::for_tab(Tab::Topics, &settings()));
        let (_, generation) = scheduler.live_timer().unwrap();
        assert!(scheduler.deactivate());
        assert!(!scheduler.deactivate());
        assert!(!scheduler.is_running());
        assert!(!scheduler.on_tick(Tab::Topics, generation));

        tokio::time::sleep(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(pump(&scheduler, &mut rx), 1);
        assert_eq!(transport.count(Method::Get, "topics/get/all"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fetch_keeps_polling() {
        let transport = ScriptedTransport::new();
        transport.respond(
            Method::Get,
            "topics/get/all",
            Err(crate::app::error::GatewayError::Timeout),
        );
        let gateway = RequestGateway::new(transport.clone(), None);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = RefreshScheduler::new(gateway, tx);
        scheduler.activate(TabDescriptor::for_tab(Tab::Topics, &settings()));

        let mut failures = 0;
        for _ in 0..5 {
            tokio::time::sleep(Duration::from_millis(500)).await;
            settle().await;
            while let Ok(event) = rx.try_recv() {
                match event {
                    DashEvent::Tick { tab, generation } => {
                        scheduler.on_tick(tab, generation);
                    }
                    DashEvent::Fetched { result: Err(_), .. } => failures += 1,
                    _ => {}
                }
            }
            settle().await;
        }
        assert!(scheduler.is_running());
        assert!(failures >= 2, "failures: {failures}");
    }
}
