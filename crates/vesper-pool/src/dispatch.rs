//! The lifecycle dispatcher: fault-isolated fan-out over host + extensions.
//!
//! A dispatch pass always visits the host first, then every extension in
//! insertion order. A participant hook that returns `Err` is reported to the
//! [`DiagnosticSink`] and the pass continues — one failing participant never
//! prevents its siblings from running, and the caller of the dispatch never
//! sees the fault directly.
//!
//! Reload is the exception: it is a short-circuiting boolean veto chain
//! (host, then extensions, then externally-registered listeners, in that
//! order), followed by an unconditional PostReload pass that observes the
//! outcome but cannot change it. A hook `Err` inside the veto chain is still
//! isolated and logged; it counts as a non-veto and the chain continues.

use tracing::warn;

use crate::instance::LiveInstance;
use crate::lifecycle::{
    HookResult, InstanceCx, LifecyclePoint, LifecycleParticipant, ReloadParams, SyncContext,
};

// ---------------------------------------------------------------------------
// DiagnosticSink
// ---------------------------------------------------------------------------

/// A fault raised by one participant during a dispatch pass.
#[derive(Debug)]
pub struct ParticipantFault {
    /// `participant_name()` of the faulting host or extension.
    pub participant: String,
    /// The lifecycle point being dispatched.
    pub point: LifecyclePoint,
    /// The error the hook returned.
    pub error: anyhow::Error,
}

/// Receives isolated participant faults. Implementations must not panic.
pub trait DiagnosticSink {
    fn report(&mut self, fault: ParticipantFault);
}

/// Default sink: logs each fault through `tracing`.
#[derive(Debug, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&mut self, fault: ParticipantFault) {
        warn!(
            participant = %fault.participant,
            point = %fault.point,
            error = %fault.error,
            "participant fault isolated during dispatch"
        );
    }
}

/// Sink that records faults for later inspection (tests, tooling).
///
/// Clones share the same underlying log; the pool is single-threaded by
/// contract, so an `Rc<RefCell<_>>` handle suffices.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    faults: std::rc::Rc<std::cell::RefCell<Vec<(String, LifecyclePoint, String)>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(participant, point, error message)` triples, in report order.
    pub fn recorded(&self) -> Vec<(String, LifecyclePoint, String)> {
        self.faults.borrow().clone()
    }

    pub fn fault_count(&self) -> usize {
        self.faults.borrow().len()
    }
}

impl DiagnosticSink for RecordingSink {
    fn report(&mut self, fault: ParticipantFault) {
        self.faults.borrow_mut().push((
            fault.participant,
            fault.point,
            fault.error.to_string(),
        ));
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Summary of one dispatch pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchReport {
    /// Participants visited (host + extensions).
    pub participants: usize,
    /// Participants whose hook faulted.
    pub faults: usize,
}

/// Outcome of a reload veto chain.
#[derive(Debug, Clone)]
pub struct ReloadOutcome {
    /// Whether every consulted participant approved.
    pub accepted: bool,
    /// Who returned the vetoing `false`, if anyone.
    pub vetoed_by: Option<String>,
    /// Faults isolated during the veto chain (each treated as a non-veto).
    pub faults: usize,
}

// ---------------------------------------------------------------------------
// ReloadListener
// ---------------------------------------------------------------------------

/// An external reload observer not owned by any single extension.
///
/// Listeners are consulted after the host and extensions, in registration
/// order, and receive the PostReload notification last.
pub trait ReloadListener {
    fn listener_name(&self) -> &str;

    /// Approve (`Ok(true)`) or veto (`Ok(false)`) the reload.
    fn on_reload(&mut self, _params: &ReloadParams) -> anyhow::Result<bool> {
        Ok(true)
    }

    /// Observe the outcome. Fired whether or not the reload was accepted.
    fn on_post_reload(&mut self, _accepted: bool) {}
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Fans lifecycle callbacks out across a host and its ordered extensions.
pub struct Dispatcher {
    sink: Box<dyn DiagnosticSink>,
    reload_listeners: Vec<Box<dyn ReloadListener>>,
}

impl Dispatcher {
    /// Dispatcher with the default tracing sink.
    pub fn new() -> Self {
        Self::with_sink(Box::new(TracingSink))
    }

    /// Dispatcher reporting to a caller-provided sink.
    pub fn with_sink(sink: Box<dyn DiagnosticSink>) -> Self {
        Self {
            sink,
            reload_listeners: Vec::new(),
        }
    }

    /// Register an external reload listener. Registration order is
    /// invocation order.
    pub fn add_reload_listener(&mut self, listener: Box<dyn ReloadListener>) {
        self.reload_listeners.push(listener);
    }

    /// Fan `point` out across the instance: host first, then each extension
    /// in insertion order, isolating faults. Extension ops queued through
    /// the context are applied after the pass.
    ///
    /// Synchronize and the reload points have their own entry points
    /// ([`synchronize`](Self::synchronize) and [`reload`](Self::reload));
    /// passing one of them here visits nothing and returns an empty report.
    pub fn dispatch(
        &mut self,
        point: LifecyclePoint,
        instance: &mut LiveInstance,
        dt: f32,
    ) -> DispatchReport {
        if matches!(
            point,
            LifecyclePoint::Synchronize | LifecyclePoint::Reload | LifecyclePoint::PostReload
        ) {
            warn!(%point, "point has a dedicated dispatcher entry point; nothing visited");
            return DispatchReport::default();
        }

        let mut cx = InstanceCx::new(instance.handle(), instance.stable_id(), dt);
        let mut report = DispatchReport::default();
        {
            let (host, extensions) = instance.parts_mut();
            Self::invoke(&mut *self.sink, &mut report, point, host, |p| {
                call_point(p, point, &mut cx)
            });
            for extension in extensions.iter_mut() {
                Self::invoke(&mut *self.sink, &mut report, point, extension.as_mut(), |p| {
                    call_point(p, point, &mut cx)
                });
            }
        }
        instance.apply_ops(cx.take_deferred());
        report
    }

    /// Synchronize fan-out: every participant reads or writes its fields in
    /// the sync document, faults isolated as usual.
    pub fn synchronize(
        &mut self,
        instance: &mut LiveInstance,
        sync: &mut SyncContext,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        let (host, extensions) = instance.parts_mut();
        Self::invoke(
            &mut *self.sink,
            &mut report,
            LifecyclePoint::Synchronize,
            host,
            |p| p.on_synchronize(sync),
        );
        for extension in extensions.iter_mut() {
            Self::invoke(
                &mut *self.sink,
                &mut report,
                LifecyclePoint::Synchronize,
                extension.as_mut(),
                |p| p.on_synchronize(sync),
            );
        }
        report
    }

    /// Run the reload veto chain, then the unconditional PostReload pass.
    ///
    /// Chain order: host, extensions in insertion order, external listeners
    /// in registration order. The first explicit `false` short-circuits the
    /// rest of the chain; a hook `Err` is reported to the sink and treated
    /// as a non-veto. PostReload always fires for every participant and
    /// listener, with the accepted flag.
    pub fn reload(&mut self, instance: &mut LiveInstance, params: &ReloadParams) -> ReloadOutcome {
        let mut outcome = ReloadOutcome {
            accepted: true,
            vetoed_by: None,
            faults: 0,
        };

        {
            let (host, extensions) = instance.parts_mut();
            let host_name = host.participant_name().to_owned();
            Self::consult(&mut *self.sink, &mut outcome, &host_name, || {
                host.on_reload(params)
            });
            if outcome.accepted {
                for extension in extensions.iter_mut() {
                    let name = extension.participant_name().to_owned();
                    Self::consult(&mut *self.sink, &mut outcome, &name, || {
                        extension.on_reload(params)
                    });
                    if !outcome.accepted {
                        break;
                    }
                }
            }
        }
        if outcome.accepted {
            for listener in self.reload_listeners.iter_mut() {
                let name = listener.listener_name().to_owned();
                Self::consult(&mut *self.sink, &mut outcome, &name, || {
                    listener.on_reload(params)
                });
                if !outcome.accepted {
                    break;
                }
            }
        }

        // PostReload observes the outcome; it cannot fail or change it.
        let accepted = outcome.accepted;
        let (host, extensions) = instance.parts_mut();
        host.on_post_reload(accepted);
        for extension in extensions.iter_mut() {
            extension.on_post_reload(accepted);
        }
        for listener in self.reload_listeners.iter_mut() {
            listener.on_post_reload(accepted);
        }

        outcome
    }

    // -- helpers ------------------------------------------------------------

    fn invoke<P: LifecycleParticipant + ?Sized>(
        sink: &mut dyn DiagnosticSink,
        report: &mut DispatchReport,
        point: LifecyclePoint,
        participant: &mut P,
        hook: impl FnOnce(&mut P) -> HookResult,
    ) {
        report.participants += 1;
        if let Err(error) = hook(&mut *participant) {
            report.faults += 1;
            sink.report(ParticipantFault {
                participant: participant.participant_name().to_owned(),
                point,
                error,
            });
        }
    }

    fn consult(
        sink: &mut dyn DiagnosticSink,
        outcome: &mut ReloadOutcome,
        name: &str,
        hook: impl FnOnce() -> anyhow::Result<bool>,
    ) {
        match hook() {
            Ok(true) => {}
            Ok(false) => {
                outcome.accepted = false;
                outcome.vetoed_by = Some(name.to_owned());
            }
            Err(error) => {
                // Faults never veto; the chain continues.
                outcome.faults += 1;
                sink.report(ParticipantFault {
                    participant: name.to_owned(),
                    point: LifecyclePoint::Reload,
                    error,
                });
            }
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn call_point<P: LifecycleParticipant + ?Sized>(
    participant: &mut P,
    point: LifecyclePoint,
    cx: &mut InstanceCx,
) -> HookResult {
    match point {
        LifecyclePoint::Initialize => participant.on_initialize(cx),
        LifecyclePoint::PostInitialize => participant.on_post_initialize(cx),
        LifecyclePoint::Update => participant.on_update(cx),
        LifecyclePoint::PostUpdate => participant.on_post_update(cx),
        LifecyclePoint::Release => participant.on_release(cx),
        // dispatch() rejects these before any participant is visited.
        LifecyclePoint::Synchronize | LifecyclePoint::Reload | LifecyclePoint::PostReload => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bookmark::SpawnParams;
    use crate::handle::InstanceHandle;
    use crate::identity::StableId;
    use crate::instance::LiveInstance;
    use crate::lifecycle::{Extension, HostObject, InstanceCx};
    use std::any::Any;
    use std::cell::RefCell;
    use std::rc::Rc;

    type CallLog = Rc<RefCell<Vec<String>>>;

    struct LoggingHost {
        log: CallLog,
        reload_answer: anyhow::Result<bool>,
    }

    impl LoggingHost {
        fn new(log: CallLog) -> Self {
            Self {
                log,
                reload_answer: Ok(true),
            }
        }
    }

    impl LifecycleParticipant for LoggingHost {
        fn participant_name(&self) -> &str {
            "host"
        }
        fn on_initialize(&mut self, _cx: &mut InstanceCx) -> HookResult {
            self.log.borrow_mut().push("host:init".to_owned());
            Ok(())
        }
        fn on_update(&mut self, _cx: &mut InstanceCx) -> HookResult {
            self.log.borrow_mut().push("host:update".to_owned());
            Ok(())
        }
        fn on_release(&mut self, _cx: &mut InstanceCx) -> HookResult {
            self.log.borrow_mut().push("host:release".to_owned());
            Ok(())
        }
        fn on_reload(&mut self, _params: &ReloadParams) -> anyhow::Result<bool> {
            self.log.borrow_mut().push("host:reload".to_owned());
            match &self.reload_answer {
                Ok(v) => Ok(*v),
                Err(_) => Err(anyhow::anyhow!("host reload fault")),
            }
        }
        fn on_post_reload(&mut self, accepted: bool) {
            self.log
                .borrow_mut()
                .push(format!("host:post_reload:{accepted}"));
        }
    }

    impl HostObject for LoggingHost {
        fn class_name(&self) -> &str {
            "Logging"
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    struct LoggingExt {
        name: &'static str,
        log: CallLog,
        fail_update: bool,
        reload_answer: Option<bool>, // None = fault
    }

    impl LoggingExt {
        fn new(name: &'static str, log: CallLog) -> Self {
            Self {
                name,
                log,
                fail_update: false,
                reload_answer: Some(true),
            }
        }
    }

    impl LifecycleParticipant for LoggingExt {
        fn participant_name(&self) -> &str {
            self.name
        }
        fn on_initialize(&mut self, _cx: &mut InstanceCx) -> HookResult {
            self.log.borrow_mut().push(format!("{}:init", self.name));
            Ok(())
        }
        fn on_update(&mut self, _cx: &mut InstanceCx) -> HookResult {
            self.log.borrow_mut().push(format!("{}:update", self.name));
            if self.fail_update {
                anyhow::bail!("update exploded");
            }
            Ok(())
        }
        fn on_release(&mut self, _cx: &mut InstanceCx) -> HookResult {
            self.log.borrow_mut().push(format!("{}:release", self.name));
            Ok(())
        }
        fn on_reload(&mut self, _params: &ReloadParams) -> anyhow::Result<bool> {
            self.log.borrow_mut().push(format!("{}:reload", self.name));
            match self.reload_answer {
                Some(v) => Ok(v),
                None => Err(anyhow::anyhow!("reload hook fault")),
            }
        }
        fn on_post_reload(&mut self, accepted: bool) {
            self.log
                .borrow_mut()
                .push(format!("{}:post_reload:{accepted}", self.name));
        }
    }

    impl Extension for LoggingExt {
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    struct LoggingListener {
        log: CallLog,
        answer: bool,
    }

    impl ReloadListener for LoggingListener {
        fn listener_name(&self) -> &str {
            "listener"
        }
        fn on_reload(&mut self, _params: &ReloadParams) -> anyhow::Result<bool> {
            self.log.borrow_mut().push("listener:reload".to_owned());
            Ok(self.answer)
        }
        fn on_post_reload(&mut self, accepted: bool) {
            self.log
                .borrow_mut()
                .push(format!("listener:post_reload:{accepted}"));
        }
    }

    fn instance_with(log: &CallLog, exts: Vec<LoggingExt>) -> LiveInstance {
        let mut inst = LiveInstance::new(
            InstanceHandle::from_raw(0),
            StableId::from_raw(1),
            "Logging".to_owned(),
            SpawnParams::named("t"),
            Box::new(LoggingHost::new(log.clone())),
        );
        for ext in exts {
            inst.add_extension(Box::new(ext));
        }
        inst
    }

    #[test]
    fn dispatch_visits_host_then_extensions_in_order() {
        let log: CallLog = Rc::default();
        let mut inst = instance_with(
            &log,
            vec![
                LoggingExt::new("a", log.clone()),
                LoggingExt::new("b", log.clone()),
                LoggingExt::new("c", log.clone()),
            ],
        );
        let mut dispatcher = Dispatcher::new();

        for point in [
            LifecyclePoint::Initialize,
            LifecyclePoint::Update,
            LifecyclePoint::Release,
        ] {
            log.borrow_mut().clear();
            dispatcher.dispatch(point, &mut inst, 0.0);
            let suffix = match point {
                LifecyclePoint::Initialize => "init",
                LifecyclePoint::Update => "update",
                _ => "release",
            };
            let expect: Vec<String> = ["host", "a", "b", "c"]
                .iter()
                .map(|n| format!("{n}:{suffix}"))
                .collect();
            assert_eq!(*log.borrow(), expect);
        }
    }

    #[test]
    fn faulting_extension_does_not_suppress_siblings() {
        let log: CallLog = Rc::default();
        let mut b = LoggingExt::new("b", log.clone());
        b.fail_update = true;
        let mut inst = instance_with(
            &log,
            vec![LoggingExt::new("a", log.clone()), b, LoggingExt::new("c", log.clone())],
        );

        let sink = RecordingSink::new();
        let mut dispatcher = Dispatcher::with_sink(Box::new(sink.clone()));
        let report = dispatcher.dispatch(LifecyclePoint::Update, &mut inst, 0.016);

        assert_eq!(report.participants, 4);
        assert_eq!(report.faults, 1);
        assert_eq!(
            *log.borrow(),
            vec!["host:update", "a:update", "b:update", "c:update"]
        );
        let faults = sink.recorded();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].0, "b");
        assert_eq!(faults[0].1, LifecyclePoint::Update);
    }

    #[test]
    fn dedicated_points_visit_nothing_through_dispatch() {
        let log: CallLog = Rc::default();
        let mut inst = instance_with(&log, vec![LoggingExt::new("a", log.clone())]);
        let mut dispatcher = Dispatcher::new();

        for point in [
            LifecyclePoint::Synchronize,
            LifecyclePoint::Reload,
            LifecyclePoint::PostReload,
        ] {
            let report = dispatcher.dispatch(point, &mut inst, 0.0);
            assert_eq!(report.participants, 0);
            assert_eq!(report.faults, 0);
        }
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn host_veto_short_circuits_but_post_reload_still_fires() {
        let log: CallLog = Rc::default();
        let mut inst = instance_with(&log, vec![LoggingExt::new("a", log.clone())]);
        inst.host_as_mut::<LoggingHost>().unwrap().reload_answer = Ok(false);

        let mut dispatcher = Dispatcher::new();
        dispatcher.add_reload_listener(Box::new(LoggingListener {
            log: log.clone(),
            answer: true,
        }));

        let outcome = dispatcher.reload(&mut inst, &ReloadParams::with_reason("test"));
        assert!(!outcome.accepted);
        assert_eq!(outcome.vetoed_by.as_deref(), Some("host"));
        // No extension or listener reload hook ran; PostReload hit everyone.
        assert_eq!(
            *log.borrow(),
            vec![
                "host:reload",
                "host:post_reload:false",
                "a:post_reload:false",
                "listener:post_reload:false",
            ]
        );
    }

    #[test]
    fn extension_veto_stops_later_extensions_and_listeners() {
        let log: CallLog = Rc::default();
        let mut a = LoggingExt::new("a", log.clone());
        a.reload_answer = Some(false);
        let mut inst = instance_with(&log, vec![a, LoggingExt::new("b", log.clone())]);

        let mut dispatcher = Dispatcher::new();
        dispatcher.add_reload_listener(Box::new(LoggingListener {
            log: log.clone(),
            answer: true,
        }));

        let outcome = dispatcher.reload(&mut inst, &ReloadParams::with_reason("test"));
        assert!(!outcome.accepted);
        assert_eq!(outcome.vetoed_by.as_deref(), Some("a"));
        let calls = log.borrow();
        assert!(calls.contains(&"a:reload".to_owned()));
        assert!(!calls.contains(&"b:reload".to_owned()));
        assert!(!calls.contains(&"listener:reload".to_owned()));
        assert!(calls.contains(&"b:post_reload:false".to_owned()));
    }

    #[test]
    fn reload_fault_is_a_non_veto_and_chain_continues() {
        let log: CallLog = Rc::default();
        let mut a = LoggingExt::new("a", log.clone());
        a.reload_answer = None; // hook errors
        let mut inst = instance_with(&log, vec![a, LoggingExt::new("b", log.clone())]);

        let sink = RecordingSink::new();
        let mut dispatcher = Dispatcher::with_sink(Box::new(sink.clone()));
        let outcome = dispatcher.reload(&mut inst, &ReloadParams::with_reason("test"));

        assert!(outcome.accepted);
        assert_eq!(outcome.faults, 1);
        assert_eq!(sink.fault_count(), 1);
        assert!(log.borrow().contains(&"b:reload".to_owned()));
        assert!(log.borrow().contains(&"b:post_reload:true".to_owned()));
    }

    #[test]
    fn listener_veto_after_all_participants_approve() {
        let log: CallLog = Rc::default();
        let mut inst = instance_with(&log, vec![LoggingExt::new("a", log.clone())]);

        let mut dispatcher = Dispatcher::new();
        dispatcher.add_reload_listener(Box::new(LoggingListener {
            log: log.clone(),
            answer: false,
        }));

        let outcome = dispatcher.reload(&mut inst, &ReloadParams::with_reason("test"));
        assert!(!outcome.accepted);
        assert_eq!(outcome.vetoed_by.as_deref(), Some("listener"));
        assert!(log.borrow().contains(&"host:reload".to_owned()));
        assert!(log.borrow().contains(&"a:reload".to_owned()));
    }

    #[test]
    fn deferred_extension_add_applies_after_the_pass() {
        struct SpawningExt {
            log: CallLog,
        }
        impl LifecycleParticipant for SpawningExt {
            fn participant_name(&self) -> &str {
                "spawner"
            }
            fn on_update(&mut self, cx: &mut InstanceCx) -> HookResult {
                self.log.borrow_mut().push("spawner:update".to_owned());
                cx.queue_add_extension(Box::new(LoggingExt::new("late", self.log.clone())));
                Ok(())
            }
        }
        impl Extension for SpawningExt {
            fn as_any(&self) -> &dyn Any {
                self
            }
            fn as_any_mut(&mut self) -> &mut dyn Any {
                self
            }
        }

        let log: CallLog = Rc::default();
        let mut inst = instance_with(&log, vec![]);
        inst.add_extension(Box::new(SpawningExt { log: log.clone() }));

        let mut dispatcher = Dispatcher::new();
        dispatcher.dispatch(LifecyclePoint::Update, &mut inst, 0.016);

        // "late" was not visited in the pass that queued it.
        assert!(!log.borrow().contains(&"late:update".to_owned()));
        assert_eq!(inst.extension_names(), vec!["spawner", "late"]);

        log.borrow_mut().clear();
        dispatcher.dispatch(LifecyclePoint::Update, &mut inst, 0.016);
        assert_eq!(
            *log.borrow(),
            vec!["host:update", "spawner:update", "late:update"]
        );
    }
}
