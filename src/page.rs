use crate::cart::{CartManager, CheckoutReceipt};
use crate::cart_view::CartView;
use crate::config::StorefrontConfig;
use crate::convergence::{ConvergencePass, Engine, EngineId, EngineState, EngineStatus, PollOutcome};
use crate::dom::{Dom, MutationRecord, NodeId};
use crate::prune::SectionPruner;
use crate::rewrite::Rebrander;
use crate::scheduler::{PendingTimer, ScheduledTask, Scheduler, TimerId};
use crate::storage::{MemoryStorage, Storage};
use crate::trace::TraceState;
use crate::{Error, Result, truncate_chars};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageTask {
    Poll(EngineId),
    Reapply(EngineId),
}

/// A loaded storefront page: document, virtual clock, cart and the engines
/// that converge externally rendered content.
#[derive(Debug)]
pub struct Page {
    dom: Dom,
    config: StorefrontConfig,
    scheduler: Scheduler<PageTask>,
    cart: CartManager,
    views: Vec<CartView>,
    engines: Vec<Engine>,
    trace: TraceState,
}

impl Page {
    pub fn from_html(html: &str) -> Result<Self> {
        Self::with_config(html, StorefrontConfig::default(), Box::new(MemoryStorage::new()))
    }

    pub fn with_storage(html: &str, storage: Box<dyn Storage>) -> Result<Self> {
        Self::with_config(html, StorefrontConfig::default(), storage)
    }

    /// Loads the document, restores the cart from `storage`, renders the
    /// configured cart view and starts the enabled engines.
    pub fn with_config(
        html: &str,
        config: StorefrontConfig,
        storage: Box<dyn Storage>,
    ) -> Result<Self> {
        config.validate()?;
        let dom = Dom::from_html(html)?;
        let cart = CartManager::open(storage, config.cart.storage_key.clone());
        let mut page = Self {
            dom,
            config,
            scheduler: Scheduler::default(),
            cart,
            views: Vec::new(),
            engines: Vec::new(),
            trace: TraceState::default(),
        };

        let view = CartView::from_config(&page.config.cart);
        if !view.is_empty() {
            page.views.push(view);
        }
        if page.config.branding.enabled {
            let pass = Rebrander::from_config(&page.config.branding)?;
            page.register_engine(Box::new(pass));
        }
        if page.config.pruning.enabled {
            let pass = SectionPruner::from_config(&page.config.pruning)?;
            page.register_engine(Box::new(pass));
        }

        page.render_views()?;
        // Initial render is part of the load, nobody observes it yet.
        page.dom.take_mutation_records();
        Ok(page)
    }

    pub fn config(&self) -> &StorefrontConfig {
        &self.config
    }

    pub fn dom(&self) -> &Dom {
        &self.dom
    }

    pub fn enable_trace(&mut self, enabled: bool) {
        self.trace.set_enabled(enabled);
    }

    pub fn take_trace_logs(&mut self) -> Vec<String> {
        self.trace.take()
    }

    pub fn set_trace_stderr(&mut self, enabled: bool) {
        self.trace.set_stderr(enabled);
    }

    pub fn set_trace_timers(&mut self, enabled: bool) {
        self.trace.set_timers(enabled);
    }

    pub fn set_trace_engines(&mut self, enabled: bool) {
        self.trace.set_engines(enabled);
    }

    pub fn set_trace_log_limit(&mut self, max_entries: usize) -> Result<()> {
        self.trace.set_limit(max_entries)
    }

    pub fn set_timer_step_limit(&mut self, max_steps: usize) -> Result<()> {
        if max_steps == 0 {
            return Err(Error::InvalidInput(
                "set_timer_step_limit requires at least 1 step".into(),
            ));
        }
        self.scheduler.set_step_limit(max_steps);
        Ok(())
    }

    // ---- cart ----

    pub fn cart(&self) -> &CartManager {
        &self.cart
    }

    pub fn storage(&self) -> &dyn Storage {
        self.cart.storage()
    }

    /// Adds one unit of a catalog product, named through the configured
    /// catalog.
    pub fn add_to_cart(&mut self, product_id: &str, price: f64) -> Result<()> {
        let name = self.config.catalog.product_name(product_id).to_string();
        self.add_item(product_id, &name, price)
    }

    pub fn add_item(&mut self, id: &str, name: &str, unit_price: f64) -> Result<()> {
        self.cart.add_item(id, name, unit_price)?;
        self.after_cart_change()
    }

    pub fn remove_from_cart(&mut self, id: &str) -> Result<()> {
        self.cart.remove_item(id)?;
        self.after_cart_change()
    }

    pub fn checkout(&mut self) -> Result<CheckoutReceipt> {
        let receipt = self.cart.checkout()?;
        self.after_cart_change()?;
        Ok(receipt)
    }

    pub fn add_cart_view(&mut self, view: CartView) -> Result<()> {
        view.render(&mut self.dom, self.cart.cart())?;
        self.views.push(view);
        self.pump_mutations(None);
        Ok(())
    }

    fn after_cart_change(&mut self) -> Result<()> {
        self.render_views()?;
        self.pump_mutations(None);
        Ok(())
    }

    fn render_views(&mut self) -> Result<()> {
        for view in &self.views {
            view.render(&mut self.dom, self.cart.cart())?;
        }
        Ok(())
    }

    /// Clicks the first element matching `selector`. Cart buttons
    /// (`.remove-item`, `.add-to-cart`) act on their `data-product-id`;
    /// anything else has no behavior.
    pub fn click(&mut self, selector: &str) -> Result<()> {
        let target = self.select_one(selector)?;

        if let Some(button) = self.dom.closest(target, ".remove-item")? {
            if let Some(id) = self.dom.attr(button, "data-product-id").map(str::to_string) {
                return self.remove_from_cart(&id);
            }
            return Ok(());
        }

        if let Some(button) = self.dom.closest(target, ".add-to-cart")? {
            let id = self
                .dom
                .attr(button, "data-product-id")
                .map(str::to_string)
                .ok_or_else(|| Error::InvalidInput("add-to-cart button has no data-product-id".into()))?;
            let raw_price = self.dom.attr(button, "data-price").unwrap_or_default();
            let price = raw_price.trim().parse::<f64>().map_err(|_| {
                Error::InvalidInput(format!("add-to-cart button has bad data-price {raw_price:?}"))
            })?;
            return self.add_to_cart(&id, price);
        }

        Ok(())
    }

    // ---- external content ----

    /// Runs an outside mutation (the external renderer) and delivers the
    /// resulting mutation records to observing engines.
    pub fn mutate<F, R>(&mut self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Dom) -> Result<R>,
    {
        let result = f(&mut self.dom);
        self.pump_mutations(None);
        result
    }

    pub fn set_inner_html(&mut self, selector: &str, html: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        self.mutate(|dom| dom.set_inner_html(target, html))
    }

    pub fn append_html(&mut self, selector: &str, html: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        self.mutate(|dom| dom.append_html(target, html).map(|_| ()))
    }

    pub fn remove(&mut self, selector: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        self.mutate(|dom| dom.remove_node(target))
    }

    /// The external renderer says it is done: every waiting engine applies
    /// now instead of waiting for its next poll.
    pub fn notify_rendered(&mut self) -> Result<()> {
        for index in 0..self.engines.len() {
            if self.engines[index].state() != EngineState::Waiting {
                continue;
            }
            if let Some(timer) = self.engines[index].pending.take() {
                self.clear_timer(timer);
            }
            let id = self.engines[index].id();
            self.trace
                .engine_line(|| format!("[engine] notified id={} waiting=false", id.0));
            self.apply_engine(id)?;
        }
        Ok(())
    }

    // ---- engines ----

    /// Adds a convergence engine. It starts in the waiting state with its
    /// first readiness poll after the configured initial delay.
    pub fn register_engine(&mut self, pass: Box<dyn ConvergencePass>) -> EngineId {
        let id = EngineId(self.engines.len());
        self.engines.push(Engine::new(id, pass));
        let timer = self.schedule(PageTask::Poll(id), self.config.convergence.initial_delay_ms);
        self.engines[id.0].pending = Some(timer);
        let name = self.engines[id.0].name().to_string();
        self.trace
            .engine_line(|| format!("[engine] register id={} name={name}", id.0));
        tracing::debug!(engine = %name, "convergence engine waiting");
        id
    }

    pub fn engine_id(&self, name: &str) -> Option<EngineId> {
        self.engines
            .iter()
            .find(|engine| engine.name() == name)
            .map(Engine::id)
    }

    pub fn engine_status(&self, id: EngineId) -> Option<EngineStatus> {
        self.engines.get(id.0).map(Engine::status)
    }

    pub fn engine_statuses(&self) -> Vec<EngineStatus> {
        self.engines.iter().map(Engine::status).collect()
    }

    fn is_ready(&self) -> Result<bool> {
        let selector = &self.config.convergence.readiness_selector;
        Ok(self
            .dom
            .query_selector(selector)?
            .is_some_and(|container| self.dom.child_element_count(container) > 0))
    }

    fn poll_engine(&mut self, id: EngineId) -> Result<()> {
        let Some(engine) = self.engines.get_mut(id.0) else {
            return Ok(());
        };
        engine.pending = None;
        if engine.state() != EngineState::Waiting {
            return Ok(());
        }

        let ready = self.is_ready()?;
        let max_attempts = self.config.convergence.max_poll_attempts;
        let engine = &mut self.engines[id.0];
        let outcome = engine.on_poll(ready, max_attempts);
        let attempts = engine.poll_attempts();
        let name = engine.name().to_string();
        self.trace.engine_line(|| {
            format!(
                "[engine] poll id={} attempt={attempts} ready={ready}",
                id.0
            )
        });

        match outcome {
            PollOutcome::Ready => {
                tracing::info!(engine = %name, attempts, "readiness container populated");
                self.apply_engine(id)?;
            }
            PollOutcome::Retry => {
                let timer = self.schedule(PageTask::Poll(id), self.config.convergence.poll_interval_ms);
                self.engines[id.0].pending = Some(timer);
            }
            PollOutcome::TimedOut => {
                tracing::warn!(engine = %name, attempts, "gave up waiting for rendered content");
                self.trace
                    .engine_line(|| format!("[engine] timeout id={} attempts={attempts}", id.0));
            }
        }
        Ok(())
    }

    fn apply_engine(&mut self, id: EngineId) -> Result<()> {
        // Outside changes made so far belong to everyone, this pass included.
        self.pump_mutations(None);

        let result = self.engines[id.0].run_pass(&mut self.dom);
        let own = self.dom.take_mutation_records();
        self.deliver_mutations(own, Some(id));

        let name = self.engines[id.0].name().to_string();
        let report = match result {
            Ok(report) => report,
            Err(err) => {
                tracing::warn!(engine = %name, error = %err, "convergence pass failed");
                self.trace
                    .engine_line(|| format!("[engine] failed id={} name={name}", id.0));
                return Err(err);
            }
        };
        self.trace.engine_line(|| {
            format!(
                "[engine] pass id={} name={name} changes={}",
                id.0,
                report.change_count()
            )
        });
        tracing::debug!(
            engine = %name,
            changes = report.change_count(),
            removed = ?report.removed_labels,
            "convergence pass applied"
        );
        Ok(())
    }

    fn pump_mutations(&mut self, source: Option<EngineId>) {
        let records = self.dom.take_mutation_records();
        self.deliver_mutations(records, source);
    }

    /// Child-list mutations that add nodes (re)start the debounce timer of
    /// every observing engine except the one that caused them.
    fn deliver_mutations(&mut self, records: Vec<MutationRecord>, source: Option<EngineId>) {
        let triggers = records
            .iter()
            .any(|record| record.is_child_list() && !record.added.is_empty());
        if !triggers {
            return;
        }
        for index in 0..self.engines.len() {
            let id = self.engines[index].id();
            if Some(id) == source || self.engines[index].state() != EngineState::Observing {
                continue;
            }
            if let Some(previous) = self.engines[index].pending.take() {
                self.clear_timer(previous);
            }
            let timer = self.schedule(PageTask::Reapply(id), self.config.convergence.debounce_ms);
            self.engines[index].pending = Some(timer);
            self.trace
                .engine_line(|| format!("[engine] debounce id={} timer={timer}", id.0));
        }
    }

    // ---- timers ----

    pub fn now_ms(&self) -> i64 {
        self.scheduler.now_ms()
    }

    pub fn pending_timers(&self) -> Vec<PendingTimer> {
        self.scheduler.pending()
    }

    /// Moves the clock forward by `delta_ms`, running every timer that falls
    /// due on the way at its own due time.
    pub fn advance_time(&mut self, delta_ms: i64) -> Result<()> {
        if delta_ms < 0 {
            return Err(Error::InvalidInput(
                "advance_time requires non-negative milliseconds".into(),
            ));
        }
        let from = self.now_ms();
        let target = from.saturating_add(delta_ms);
        let ran = self.run_timer_queue(Some(target), true)?;
        self.scheduler.set_now(target);
        self.trace.timer_line(|| {
            format!("[timer] advance delta_ms={delta_ms} from={from} to={target} ran_due={ran}")
        });
        Ok(())
    }

    pub fn advance_time_to(&mut self, target_ms: i64) -> Result<()> {
        let now = self.now_ms();
        if target_ms < now {
            return Err(Error::InvalidInput(format!(
                "advance_time_to requires target >= now_ms (target={target_ms}, now_ms={now})"
            )));
        }
        let ran = self.run_timer_queue(Some(target_ms), true)?;
        self.scheduler.set_now(target_ms);
        self.trace.timer_line(|| {
            format!("[timer] advance_to from={now} to={target_ms} ran_due={ran}")
        });
        Ok(())
    }

    /// Runs timers already due without moving the clock.
    pub fn run_due_timers(&mut self) -> Result<usize> {
        let now = self.now_ms();
        let ran = self.run_timer_queue(Some(now), false)?;
        self.trace
            .timer_line(|| format!("[timer] run_due now_ms={now} ran={ran}"));
        Ok(ran)
    }

    pub fn run_next_timer(&mut self) -> Result<bool> {
        let Some(task) = self.scheduler.pop_next(None, true) else {
            self.trace.timer_line(|| "[timer] run_next none".into());
            return Ok(false);
        };
        self.execute_task(task)?;
        Ok(true)
    }

    /// Runs the queue until it is empty, jumping the clock from timer to
    /// timer.
    pub fn flush(&mut self) -> Result<()> {
        let from = self.now_ms();
        let ran = self.run_timer_queue(None, true)?;
        let to = self.now_ms();
        self.trace
            .timer_line(|| format!("[timer] flush from={from} to={to} ran={ran}"));
        Ok(())
    }

    fn run_timer_queue(&mut self, due_limit: Option<i64>, advance_clock: bool) -> Result<usize> {
        let mut steps = 0usize;
        while let Some(task) = self.scheduler.pop_next(due_limit, advance_clock) {
            steps += 1;
            if steps > self.scheduler.step_limit() {
                return Err(self.scheduler.step_limit_error());
            }
            self.execute_task(task)?;
        }
        Ok(steps)
    }

    fn execute_task(&mut self, task: ScheduledTask<PageTask>) -> Result<()> {
        let now = self.now_ms();
        self.trace.timer_line(|| {
            format!(
                "[timer] run id={} due_at={} now_ms={now} task={:?}",
                task.id, task.due_at, task.payload
            )
        });
        match task.payload {
            PageTask::Poll(id) => self.poll_engine(id),
            PageTask::Reapply(id) => {
                let Some(engine) = self.engines.get_mut(id.0) else {
                    return Ok(());
                };
                engine.pending = None;
                self.apply_engine(id)
            }
        }
    }

    fn schedule(&mut self, task: PageTask, delay_ms: i64) -> TimerId {
        let (id, due_at) = self.scheduler.schedule_timeout(task, delay_ms);
        self.trace.timer_line(|| {
            format!("[timer] schedule timeout id={id} due_at={due_at} delay_ms={delay_ms}")
        });
        id
    }

    fn clear_timer(&mut self, id: TimerId) {
        let removed = self.scheduler.clear(id);
        self.trace
            .timer_line(|| format!("[timer] clear id={id} removed={removed}"));
    }

    // ---- inspection ----

    pub fn text(&self, selector: &str) -> Result<String> {
        let target = self.select_one(selector)?;
        Ok(self.dom.text_content(target))
    }

    pub fn assert_text(&self, selector: &str, expected: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        let actual = self.dom.text_content(target);
        if actual != expected {
            return Err(Error::AssertionFailed {
                selector: selector.to_string(),
                expected: expected.to_string(),
                actual,
                dom_snippet: self.node_snippet(target),
            });
        }
        Ok(())
    }

    pub fn assert_exists(&self, selector: &str) -> Result<()> {
        let _ = self.select_one(selector)?;
        Ok(())
    }

    pub fn assert_absent(&self, selector: &str) -> Result<()> {
        if let Some(found) = self.dom.query_selector(selector)? {
            return Err(Error::AssertionFailed {
                selector: selector.to_string(),
                expected: "no match".into(),
                actual: "element present".into(),
                dom_snippet: self.node_snippet(found),
            });
        }
        Ok(())
    }

    pub fn dump_dom(&self, selector: &str) -> Result<String> {
        let target = self.select_one(selector)?;
        Ok(self.dom.dump_node(target))
    }

    fn select_one(&self, selector: &str) -> Result<NodeId> {
        self.dom
            .query_selector(selector)?
            .ok_or_else(|| Error::SelectorNotFound(selector.to_string()))
    }

    fn node_snippet(&self, node_id: NodeId) -> String {
        truncate_chars(&self.dom.dump_node(node_id), 200)
    }
}
