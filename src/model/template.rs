//! Declarations of the standard schedule and controller nodes.
//!
//! These fill a [`NodeBuilder`] with the data objects the scheduler looks
//! for, so that hosts and tests don't have to spell them out.

use super::{NodeBuilder, Value, ValueKind};
use crate::schedule::interval::SI_UNIT_SECOND;
use crate::schedule::TargetKind;

const QUALITY: (&str, ValueKind) = ("q", ValueKind::Quality);
const TIMESTAMP: (&str, ValueKind) = ("t", ValueKind::Time);

/// Declares a status object `name` with `stVal` of `kind`, quality and
/// timestamp.
pub fn status(ln: &mut NodeBuilder, name: &str, kind: ValueKind) {
    ln.object(name, &[("stVal", kind), QUALITY, TIMESTAMP]);
}

/// Declares an object shaped like the mirror of `kind` (`mag.f` for
/// analogue values, `stVal` otherwise).
pub fn value_object(ln: &mut NodeBuilder, name: &str, kind: TargetKind) {
    ln.object(
        name,
        &[(kind.mirror_attribute(), kind.value_kind()), QUALITY, TIMESTAMP],
    );
}

/// Declares a schedule node with `entries` entry objects (`ValASG001`...)
/// and `start_times` start-time objects (`StrTm01`...).
///
/// The interval defaults to seconds with a zero multiplier.
///
/// # Examples
///
/// ```
/// use der_scheduler::model::{template, DataModel};
/// use der_scheduler::schedule::TargetKind;
///
/// let model = DataModel::builder("IED1")
///     .device("LD0", |ld| {
///         ld.node("FSCH1", |ln| template::schedule(ln, TargetKind::AnalogValue, 3, 2));
///     })
///     .build();
///
/// assert!(model.has_object("LD0/FSCH1.ValASG003"));
/// assert!(model.has_object("LD0/FSCH1.StrTm02"));
/// ```
pub fn schedule(ln: &mut NodeBuilder, kind: TargetKind, entries: usize, start_times: usize) {
    status(ln, "SchdSt", ValueKind::Int);
    status(ln, "SchdEnaErr", ValueKind::Int);
    status(ln, "NxtStrTm", ValueKind::Time);
    status(ln, "ActStrTm", ValueKind::Time);
    status(ln, "SchdEntr", ValueKind::Int);
    ln.object("SchdPrio", &[("setVal", ValueKind::Int)])
        .object("SchdReuse", &[("setVal", ValueKind::Bool)])
        .object("NumEntr", &[("setVal", ValueKind::Int)])
        .object(
            "SchdIntv",
            &[
                ("setVal", ValueKind::Int),
                ("units.SIUnit", ValueKind::Int),
                ("units.multiplier", ValueKind::Int),
            ],
        )
        .object("EnaReq", &[("stVal", ValueKind::Bool)])
        .object("DsaReq", &[("stVal", ValueKind::Bool)])
        .value("SchdIntv.units.SIUnit", Value::Int(SI_UNIT_SECOND));

    value_object(ln, kind.mirror_object(), kind);

    let entry_attr = kind.entry_attributes()[0];
    for index in 1..=entries {
        ln.object(
            &format!("{}{index:03}", kind.entry_prefix()),
            &[(entry_attr, kind.value_kind())],
        );
    }

    for index in 1..=start_times {
        ln.object(&format!("StrTm{index:02}"), &[("setTm", ValueKind::Time)]);
    }
}

/// Adds the event trigger objects (`EvTrg`, `InSyn`) to a schedule node.
pub fn event_trigger(ln: &mut NodeBuilder) {
    ln.object("EvTrg", &[("setVal", ValueKind::Bool)])
        .object("InSyn", &[("setSrcRef", ValueKind::Str)]);
}

/// Declares a schedule controller node with `slots` binding objects
/// (`Schd01`...).
pub fn controller(ln: &mut NodeBuilder, kind: TargetKind, slots: usize) {
    status(ln, "ActSchdRef", ValueKind::Str);
    ln.object("CtlEnt", &[("setSrcRef", ValueKind::Str)]);
    value_object(ln, kind.mirror_object(), kind);

    for index in 1..=slots {
        ln.object(&format!("Schd{index:02}"), &[("setSrcRef", ValueKind::Str)]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DataModel;

    #[test]
    fn binary_schedule_uses_set_val_entries() {
        let model = DataModel::builder("IED1")
            .device("LD0", |ld| {
                ld.node("FSCH2", |ln| {
                    schedule(ln, TargetKind::BinaryStatus, 2, 0);
                });
            })
            .build();

        assert_eq!(
            model.kind_of("LD0/FSCH2.ValSPG001.setVal"),
            Some(ValueKind::Bool)
        );
        assert_eq!(
            model.kind_of("LD0/FSCH2.ValSPS.stVal"),
            Some(ValueKind::Bool)
        );
        assert_eq!(model.get_int("LD0/FSCH2.SchdIntv.units.SIUnit"), Some(4));
        assert!(!model.has_object("LD0/FSCH2.StrTm01"));
    }

    #[test]
    fn controller_declares_numbered_slots() {
        let model = DataModel::builder("IED1")
            .device("LD0", |ld| {
                ld.node("FSCC1", |ln| controller(ln, TargetKind::AnalogValue, 3));
            })
            .build();

        assert!(model.has_object("LD0/FSCC1.Schd03"));
        assert_eq!(
            model.kind_of("LD0/FSCC1.ValMV.mag.f"),
            Some(ValueKind::Float)
        );
        assert_eq!(
            model.kind_of("LD0/FSCC1.ActSchdRef.stVal"),
            Some(ValueKind::Str)
        );
    }
}
