//! End-to-end scheduling: enable, run progression and arbitration.

mod common;

use std::thread;
use std::time::{Duration, Instant};

use der_scheduler::model::{DataAccessError, Quality, Value};
use der_scheduler::schedule::{EnableError, ScheduleParameter, ScheduleState};
use der_scheduler::telemetry::TargetValueLog;

use common::{NOW, manual_config, model, scheduler, set_start_time};

#[test]
fn discovers_schedules_and_controllers() {
    let (scheduler, _clock) = scheduler(model(), manual_config());
    assert_eq!(scheduler.schedules().len(), 2);
    assert_eq!(scheduler.controllers().len(), 1);
    assert!(scheduler.schedule("IED1LD0/FSCH1").is_some());
    assert!(scheduler.schedule("@LD0/FSCH2").is_some());
    assert!(scheduler.schedule("LD0/FSCH2").is_none());
    assert!(scheduler.controller("@LD0/FSCC1").is_some());
    assert!(scheduler.schedule("IED1LD0/GGIO1").is_none());
}

#[test]
fn enable_with_valid_configuration_is_ready() {
    let model = model();
    let (scheduler, _clock) = scheduler(model.clone(), manual_config());
    set_start_time(&model, "FSCH1", 1, NOW + 60_000);

    assert!(scheduler.enable_schedule("@LD0/FSCH1", true));
    let schedule = scheduler.schedule("@LD0/FSCH1").expect("fixture schedule");
    assert_eq!(schedule.state(), ScheduleState::Ready);
    assert_eq!(model.get_int("LD0/FSCH1.SchdEnaErr.stVal"), Some(1));
    assert_eq!(model.get_time("LD0/FSCH1.NxtStrTm.stVal"), Some(NOW + 60_000));
}

#[test]
fn enable_with_zero_entries_reports_diagnostic() {
    let model = model();
    let (scheduler, _clock) = scheduler(model.clone(), manual_config());
    set_start_time(&model, "FSCH1", 1, NOW + 60_000);
    model.set("LD0/FSCH1.NumEntr.setVal", Value::Int(0));

    assert!(!scheduler.enable_schedule("@LD0/FSCH1", true));
    let schedule = scheduler.schedule("@LD0/FSCH1").expect("fixture schedule");
    assert_eq!(schedule.state(), ScheduleState::NotReady);
    assert_eq!(schedule.enable_error(), Some(EnableError::MissingValidNumEntr));
}

#[test]
fn unknown_reference_is_rejected() {
    let (scheduler, _clock) = scheduler(model(), manual_config());
    assert!(!scheduler.enable_schedule("@LD0/FSCH9", true));
    assert!(!scheduler.enable_schedule_control("IED2LD0/FSCH1", false));
    assert!(!scheduler.enable_write_access_to_parameter(
        "@LD0/FSCH9",
        ScheduleParameter::Priority,
        false
    ));
    assert!(scheduler.try_schedule("@LD0/FSCH9").is_err());
}

#[test]
fn schedule_control_policy_gates_remote_enable() {
    let model = model();
    let (scheduler, _clock) = scheduler(model.clone(), manual_config());
    set_start_time(&model, "FSCH1", 1, NOW + 60_000);

    assert!(scheduler.enable_schedule_control("@LD0/FSCH1", false));
    assert!(model.operate("LD0/FSCH1.EnaReq", true, false).is_err());

    assert!(scheduler.enable_schedule_control("@LD0/FSCH1", true));
    assert!(model.operate("LD0/FSCH1.EnaReq", true, false).is_ok());
    assert_eq!(
        scheduler.schedule("@LD0/FSCH1").map(|s| s.state()),
        Some(ScheduleState::Ready)
    );
}

#[test]
fn write_policy_gates_priority() {
    let model = model();
    let (scheduler, _clock) = scheduler(model.clone(), manual_config());
    assert!(scheduler.enable_write_access_to_parameter(
        "@LD0/FSCH1",
        ScheduleParameter::Priority,
        false
    ));
    assert_eq!(
        model.write("LD0/FSCH1.SchdPrio.setVal", Value::Int(99)),
        Err(DataAccessError::AccessDenied)
    );
}

#[test]
fn run_progression_follows_entry_interval() {
    let model = model();
    let (scheduler, _clock) = scheduler(model.clone(), manual_config());
    let t0 = NOW + 1_000;
    set_start_time(&model, "FSCH1", 1, t0);
    assert!(scheduler.enable_schedule("@LD0/FSCH1", true));

    scheduler.tick(t0 + 500);
    assert_eq!(model.get_float("LD0/FSCH1.ValMV.mag.f"), Some(10.0));
    assert_eq!(model.get_int("LD0/FSCH1.SchdEntr.stVal"), Some(1));

    scheduler.tick(t0 + 1_500);
    assert_eq!(model.get_float("LD0/FSCH1.ValMV.mag.f"), Some(20.0));
    assert_eq!(model.get_int("LD0/FSCH1.SchdEntr.stVal"), Some(2));

    scheduler.tick(t0 + 3_500);
    let schedule = scheduler.schedule("@LD0/FSCH1").expect("fixture schedule");
    assert_eq!(schedule.state(), ScheduleState::NotReady);
    assert_eq!(model.get_quality("LD0/FSCH1.ValMV"), Some(Quality::Invalid));
}

#[test]
fn higher_priority_schedule_takes_over() {
    let model = model();
    let (scheduler, _clock) = scheduler(model.clone(), manual_config());
    let log = TargetValueLog::new();
    log.install(&scheduler);

    let t0 = NOW + 1_000;
    set_start_time(&model, "FSCH1", 1, t0);
    set_start_time(&model, "FSCH2", 1, t0 + 500);
    assert!(scheduler.enable_schedule("@LD0/FSCH1", true));
    assert!(scheduler.enable_schedule("@LD0/FSCH2", true));
    assert_eq!(model.get_str("LD0/FSCC1.ActSchdRef.stVal").as_deref(), Some(""));
    assert_eq!(model.get_quality("LD0/FSCC1.ActSchdRef"), Some(Quality::Invalid));

    scheduler.tick(t0 + 1);
    assert_eq!(
        model.get_str("LD0/FSCC1.ActSchdRef.stVal").as_deref(),
        Some("IED1LD0/FSCH1")
    );
    assert_eq!(model.get_float("LD0/GGIO1.AnOut1.mag.f"), Some(10.0));
    assert_eq!(model.get_quality("LD0/GGIO1.AnOut1"), Some(Quality::Good));

    scheduler.tick(t0 + 501);
    assert_eq!(
        model.get_str("LD0/FSCC1.ActSchdRef.stVal").as_deref(),
        Some("IED1LD0/FSCH2")
    );
    assert_eq!(model.get_float("LD0/GGIO1.AnOut1.mag.f"), Some(100.0));
    assert_eq!(model.get_float("LD0/FSCC1.ValMV.mag.f"), Some(100.0));

    // FSCH1 moves to its second entry but is not active.
    scheduler.tick(t0 + 1_001);
    assert_eq!(model.get_float("LD0/FSCH1.ValMV.mag.f"), Some(20.0));
    assert_eq!(model.get_float("LD0/GGIO1.AnOut1.mag.f"), Some(100.0));

    // FSCH2 ends, FSCH1 takes over and the target stays invalid until
    // FSCH1 publishes again.
    scheduler.tick(t0 + 2_501);
    assert_eq!(
        model.get_str("LD0/FSCC1.ActSchdRef.stVal").as_deref(),
        Some("IED1LD0/FSCH1")
    );
    assert_eq!(model.get_quality("LD0/GGIO1.AnOut1"), Some(Quality::Invalid));

    assert_eq!(
        scheduler.target_value("@LD0/FSCC1"),
        Some(("IED1LD0/GGIO1.AnOut1".to_string(), Value::Float(100.0)))
    );

    let good: Vec<Value> = log
        .records()
        .into_iter()
        .filter(|c| c.quality == Quality::Good)
        .map(|c| c.value)
        .collect();
    assert_eq!(good, vec![Value::Float(10.0), Value::Float(100.0)]);
    assert_eq!(
        log.latest("IED1LD0/GGIO1.AnOut1").map(|c| c.quality),
        Some(Quality::Invalid)
    );
}

#[test]
fn equal_priority_keeps_earlier_slot() {
    let model = model();
    let (scheduler, _clock) = scheduler(model.clone(), manual_config());
    scheduler
        .schedule("@LD0/FSCH2")
        .expect("fixture schedule")
        .set_priority(10);

    let t0 = NOW + 1_000;
    set_start_time(&model, "FSCH1", 1, t0);
    set_start_time(&model, "FSCH2", 1, t0);
    assert!(scheduler.enable_schedule("@LD0/FSCH1", true));
    assert!(scheduler.enable_schedule("@LD0/FSCH2", true));

    scheduler.tick(t0 + 1);
    assert_eq!(
        model.get_str("LD0/FSCC1.ActSchdRef.stVal").as_deref(),
        Some("IED1LD0/FSCH1")
    );
    assert_eq!(model.get_float("LD0/GGIO1.AnOut1.mag.f"), Some(10.0));

    // Raising FSCH2 above FSCH1 switches the active schedule at once.
    assert_eq!(model.write("LD0/FSCH2.SchdPrio.setVal", Value::Int(11)), Ok(()));
    assert_eq!(
        model.get_str("LD0/FSCC1.ActSchdRef.stVal").as_deref(),
        Some("IED1LD0/FSCH2")
    );
}

#[test]
fn binding_rejects_duplicates_and_unknown_schedules() {
    let model = model();
    let (scheduler, _clock) = scheduler(model.clone(), manual_config());

    assert_eq!(
        model.write("LD0/FSCC1.Schd02.setSrcRef", Value::Str("IED1LD0/FSCH1".into())),
        Err(DataAccessError::ValueInvalid)
    );
    assert_eq!(
        model.write("LD0/FSCC1.Schd02.setSrcRef", Value::Str("IED1LD0/FSCH7".into())),
        Err(DataAccessError::ValueInvalid)
    );
    assert_eq!(
        model.get_str("LD0/FSCC1.Schd02.setSrcRef").as_deref(),
        Some("IED1LD0/FSCH2")
    );

    assert_eq!(
        model.write("LD0/FSCC1.Schd02.setSrcRef", Value::Str(String::new())),
        Ok(())
    );
    assert_eq!(
        model.write("LD0/FSCC1.Schd01.setSrcRef", Value::Str("@LD0/FSCH2".into())),
        Ok(())
    );

    let controller = scheduler.controller("@LD0/FSCC1").expect("fixture controller");
    let bound: Vec<Option<String>> = controller
        .bindings()
        .into_iter()
        .map(|b| b.schedule)
        .collect();
    assert_eq!(bound, vec![Some("IED1LD0/FSCH2".to_string()), None]);
}

#[test]
fn unbound_schedule_no_longer_drives_controller() {
    let model = model();
    let (scheduler, _clock) = scheduler(model.clone(), manual_config());
    assert_eq!(
        model.write("LD0/FSCC1.Schd01.setSrcRef", Value::Str(String::new())),
        Ok(())
    );

    let t0 = NOW + 1_000;
    set_start_time(&model, "FSCH1", 1, t0);
    assert!(scheduler.enable_schedule("@LD0/FSCH1", true));
    scheduler.tick(t0 + 1);

    assert_eq!(model.get_float("LD0/FSCH1.ValMV.mag.f"), Some(10.0));
    assert_eq!(model.get_str("LD0/FSCC1.ActSchdRef.stVal").as_deref(), Some(""));
    assert_eq!(model.get_float("LD0/GGIO1.AnOut1.mag.f"), Some(0.0));
}

#[test]
fn controlled_entity_must_carry_a_value() {
    let model = model();
    let (_scheduler, _clock) = scheduler(model.clone(), manual_config());

    assert_eq!(
        model.write("LD0/FSCC1.CtlEnt.setSrcRef", Value::Str("IED1LD0/GGIO1.AnOut1.q".into())),
        Err(DataAccessError::ValueInvalid)
    );
    assert_eq!(
        model.write("LD0/FSCC1.CtlEnt.setSrcRef", Value::Str("IED1LD0/GGIO9.AnOut1".into())),
        Err(DataAccessError::ValueInvalid)
    );
    assert_eq!(
        model.write("LD0/FSCC1.CtlEnt.setSrcRef", Value::Str("@LD0/GGIO1.AnOut1.mag.f".into())),
        Ok(())
    );
}

#[test]
fn disable_twice_leaves_not_ready() {
    let model = model();
    let (scheduler, _clock) = scheduler(model.clone(), manual_config());
    set_start_time(&model, "FSCH1", 1, NOW + 60_000);
    assert!(scheduler.enable_schedule("@LD0/FSCH1", true));

    assert!(scheduler.enable_schedule("@LD0/FSCH1", false));
    assert!(scheduler.enable_schedule("@LD0/FSCH1", false));
    assert_eq!(
        scheduler.schedule("@LD0/FSCH1").map(|s| s.state()),
        Some(ScheduleState::NotReady)
    );
    assert_eq!(model.get_int("LD0/FSCH1.SchdSt.stVal"), Some(1));
}

#[test]
fn loops_drive_schedules_when_autostarted() {
    let model = model();
    let mut config = manual_config();
    config.scheduler.autostart = true;
    config.scheduler.poll_period_ms = 5;
    let (scheduler, clock) = scheduler(model.clone(), config);
    assert!(scheduler.is_running());

    set_start_time(&model, "FSCH1", 1, NOW + 1_000);
    assert!(scheduler.enable_schedule("@LD0/FSCH1", true));
    clock.set(NOW + 1_500);

    let deadline = Instant::now() + Duration::from_secs(5);
    while model.get_float("LD0/GGIO1.AnOut1.mag.f") != Some(10.0) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(model.get_float("LD0/GGIO1.AnOut1.mag.f"), Some(10.0));

    scheduler.shutdown();
    assert!(!scheduler.is_running());
}

#[test]
fn policy_overrides_from_toml_apply_per_schedule() {
    let config = der_scheduler::config::SchedulerConfig::from_toml_str(
        r#"
[scheduler]
autostart = false

[policy]
write_reuse = false

[[policy.overrides]]
reference = "@LD0/FSCH2"
write_priority = false
"#,
    )
    .expect("config should parse");
    assert!(config.validate().is_empty());

    let model = model();
    let (scheduler, _clock) = scheduler(model.clone(), config);
    let fsch1 = scheduler.schedule("@LD0/FSCH1").expect("fixture schedule");
    let fsch2 = scheduler.schedule("@LD0/FSCH2").expect("fixture schedule");

    assert!(fsch1.policy().write_allowed(ScheduleParameter::Priority));
    assert!(!fsch1.policy().write_allowed(ScheduleParameter::Reuse));
    assert!(!fsch2.policy().write_allowed(ScheduleParameter::Priority));
    assert!(fsch2.policy().write_allowed(ScheduleParameter::StartTime));
    assert_eq!(
        model.write("LD0/FSCH2.SchdPrio.setVal", Value::Int(1)),
        Err(DataAccessError::AccessDenied)
    );
}

#[test]
fn disable_mid_run_releases_controller() {
    let model = model();
    let (scheduler, _clock) = scheduler(model.clone(), manual_config());
    let t0 = NOW + 1_000;
    set_start_time(&model, "FSCH1", 1, t0);
    assert!(scheduler.enable_schedule("@LD0/FSCH1", true));

    scheduler.tick(t0 + 1_500);
    let schedule = scheduler.schedule("@LD0/FSCH1").expect("fixture schedule");
    assert_eq!(schedule.state(), ScheduleState::Running);
    assert_eq!(schedule.active_entry(), Some(2));
    assert_eq!(model.get_quality("LD0/GGIO1.AnOut1"), Some(Quality::Good));

    assert!(scheduler.enable_schedule("@LD0/FSCH1", false));
    assert_eq!(schedule.state(), ScheduleState::NotReady);
    assert_eq!(model.get_int("LD0/FSCH1.SchdSt.stVal"), Some(1));
    assert_eq!(model.get_str("LD0/FSCC1.ActSchdRef.stVal").as_deref(), Some(""));
    assert_eq!(model.get_quality("LD0/FSCC1.ActSchdRef"), Some(Quality::Invalid));
    assert_eq!(model.get_quality("LD0/GGIO1.AnOut1"), Some(Quality::Invalid));

    // Later ticks do not resume the run.
    scheduler.tick(t0 + 2_500);
    assert_eq!(schedule.state(), ScheduleState::NotReady);
    assert_eq!(model.get_float("LD0/GGIO1.AnOut1.mag.f"), Some(20.0));
}

#[test]
fn value_that_does_not_fit_target_is_published_invalid() {
    let model = model();
    let (scheduler, _clock) = scheduler(model.clone(), manual_config());
    let log = TargetValueLog::new();
    log.install(&scheduler);
    assert_eq!(
        model.write("LD0/FSCC1.CtlEnt.setSrcRef", Value::Str("IED1LD0/GGIO1.SPCSO1".into())),
        Ok(())
    );

    let t0 = NOW + 1_000;
    set_start_time(&model, "FSCH1", 1, t0);
    assert!(scheduler.enable_schedule("@LD0/FSCH1", true));
    scheduler.tick(t0 + 1);

    assert_eq!(model.get_bool("LD0/GGIO1.SPCSO1.stVal"), Some(false));
    assert_eq!(model.get_quality("LD0/GGIO1.SPCSO1"), Some(Quality::Invalid));
    // The controller's own analogue mirror still takes the value.
    assert_eq!(model.get_float("LD0/FSCC1.ValMV.mag.f"), Some(10.0));
    assert_eq!(model.get_quality("LD0/FSCC1.ValMV"), Some(Quality::Good));

    let latest = log.latest("IED1LD0/GGIO1.SPCSO1").expect("change recorded");
    assert_eq!(latest.value, Value::Float(10.0));
    assert_eq!(latest.quality, Quality::Invalid);
    assert!(log.records().iter().all(|c| c.quality == Quality::Invalid));
}
