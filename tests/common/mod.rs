//! Shared test fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use der_scheduler::Scheduler;
use der_scheduler::clock::ManualClock;
use der_scheduler::config::SchedulerConfig;
use der_scheduler::model::{DataModel, Value, ValueKind, template};
use der_scheduler::schedule::TargetKind;

/// Wall-clock start of every fixture, in ms since the epoch.
pub const NOW: u64 = 1_700_000_000_000;

/// Fixture model `IED1` with one logical device `LD0`:
///
/// - `FSCH1`: analogue schedule, priority 10, entries 10/20/30, 1 s interval
/// - `FSCH2`: analogue schedule, priority 20, entries 100/200, 1 s interval
/// - `FSCC1`: controller with `Schd01 = FSCH1`, `Schd02 = FSCH2`, controlling
///   `GGIO1.AnOut1`
/// - `GGIO1`: `AnOut1` (analogue output), `SPCSO1` (binary output) and
///   `Ind1` (boolean indication)
pub fn model() -> Arc<DataModel> {
    Arc::new(
        DataModel::builder("IED1")
            .device("LD0", |ld| {
                ld.node("FSCH1", |ln| {
                    template::schedule(ln, TargetKind::AnalogValue, 3, 2);
                    ln.value("SchdPrio.setVal", Value::Int(10))
                        .value("NumEntr.setVal", Value::Int(3))
                        .value("SchdIntv.setVal", Value::Int(1))
                        .value("ValASG001.setMag.f", Value::Float(10.0))
                        .value("ValASG002.setMag.f", Value::Float(20.0))
                        .value("ValASG003.setMag.f", Value::Float(30.0));
                })
                .node("FSCH2", |ln| {
                    template::schedule(ln, TargetKind::AnalogValue, 2, 1);
                    ln.value("SchdPrio.setVal", Value::Int(20))
                        .value("NumEntr.setVal", Value::Int(2))
                        .value("SchdIntv.setVal", Value::Int(1))
                        .value("ValASG001.setMag.f", Value::Float(100.0))
                        .value("ValASG002.setMag.f", Value::Float(200.0));
                })
                .node("FSCC1", |ln| {
                    template::controller(ln, TargetKind::AnalogValue, 2);
                    ln.value("Schd01.setSrcRef", Value::Str("IED1LD0/FSCH1".into()))
                        .value("Schd02.setSrcRef", Value::Str("IED1LD0/FSCH2".into()))
                        .value("CtlEnt.setSrcRef", Value::Str("IED1LD0/GGIO1.AnOut1".into()));
                })
                .node("GGIO1", |ln| {
                    template::value_object(ln, "AnOut1", TargetKind::AnalogValue);
                    template::value_object(ln, "SPCSO1", TargetKind::BinaryStatus);
                    ln.object("Ind1", &[("stVal", ValueKind::Bool)]);
                });
            })
            .build(),
    )
}

/// Configuration with the loops off, so tests drive time with `tick`.
pub fn manual_config() -> SchedulerConfig {
    let mut config = SchedulerConfig::default();
    config.scheduler.autostart = false;
    config
}

/// Scheduler over `model` on a manual clock set to [`NOW`].
pub fn scheduler(model: Arc<DataModel>, config: SchedulerConfig) -> (Scheduler, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(NOW));
    let scheduler =
        Scheduler::with_clock(model, config, clock.clone()).expect("fixture scheduler should build");
    (scheduler, clock)
}

/// Sets start time slot `slot` (1-based) of `node` to `time`.
pub fn set_start_time(model: &DataModel, node: &str, slot: usize, time: u64) {
    model.set(
        &format!("LD0/{node}.StrTm{slot:02}.setTm"),
        Value::Time(time),
    );
}
