//! Consistency checks run once before any hardware is touched.
//!
//! Each orchestrator has its own [`Validator`]. A validator never fails: it
//! collects every problem it finds as a message and reports `ok == false`
//! if there was at least one.

use crate::graph::{DeviceGraph, RoleKind, ROLE_OSC};
use crate::settings::{SourceAction, SourceFunction, SourceRange, SourceSettings};
use crate::units::Nanos;

/// Validator collaborator consulted by the orchestrators.
pub trait Validator: Send + Sync {
    /// Returns `(messages, ok)` for the selected tabs.
    fn validate(&self, graph: &DeviceGraph, tabs: &[String]) -> (Vec<String>, bool);
}

/// Checks for Sweep runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct SweepValidator;

/// Checks for Delay runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct DelayValidator;

/// Checks for VI runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct ViValidator;

impl Validator for SweepValidator {
    fn validate(&self, graph: &DeviceGraph, tabs: &[String]) -> (Vec<String>, bool) {
        finish(tabs.iter().flat_map(|tab| {
            let mut messages = common(graph, tab);
            messages.extend(sweep_rules(graph, tab));
            messages.extend(sweep_target_rules(graph, tab));
            messages
        }))
    }
}

impl Validator for DelayValidator {
    fn validate(&self, graph: &DeviceGraph, tabs: &[String]) -> (Vec<String>, bool) {
        finish(tabs.iter().flat_map(|tab| {
            let mut messages = common(graph, tab);
            messages.extend(sweep_rules(graph, tab));
            messages.extend(delay_rules(graph, tab));
            messages
        }))
    }
}

impl Validator for ViValidator {
    fn validate(&self, graph: &DeviceGraph, tabs: &[String]) -> (Vec<String>, bool) {
        finish(tabs.iter().flat_map(|tab| {
            let mut messages = common(graph, tab);
            messages.extend(vi_rules(graph, tab));
            messages
        }))
    }
}

fn finish(messages: impl Iterator<Item = String>) -> (Vec<String>, bool) {
    let messages: Vec<String> = messages.collect();
    let ok = messages.is_empty();
    (messages, ok)
}

/// Sources with settings on `tab`, in graph order.
fn sources<'g>(graph: &'g DeviceGraph, tab: &'g str) -> impl Iterator<Item = (&'g str, &'g SourceSettings)> {
    graph
        .of_kind(RoleKind::Source)
        .filter_map(move |d| d.settings(tab).and_then(|s| s.as_source()).map(|s| (d.role_id.as_str(), s)))
}

fn unit_matches(label: &str, symbol: char) -> bool {
    let label = label.trim();
    label.is_empty() || label.ends_with(symbol) || label.ends_with(symbol.to_ascii_lowercase())
}

fn common(graph: &DeviceGraph, tab: &str) -> Vec<String> {
    let mut messages = Vec::new();
    if !graph.has_tab(tab) {
        messages.push(format!("{}: no settings for this tab", tab));
        return messages;
    }

    for (role, source) in sources(graph, tab) {
        if !source.action.is_used() {
            continue;
        }
        let is_const = source.function == SourceFunction::Const || source.action != SourceAction::Sweep;
        if is_const {
            if let SourceRange::Fixed(range) = source.range {
                if source.value.abs() > range {
                    messages.push(format!(
                        "{} {}: value {} exceeds range {}",
                        tab, role, source.value, range
                    ));
                }
            }
        }
        if !unit_matches(&source.value_unit, source.mode.unit_symbol()) {
            messages.push(format!(
                "{} {}: value unit '{}' does not match mode {}",
                tab,
                role,
                source.value_unit,
                source.mode.scpi()
            ));
        }
        if !unit_matches(&source.limit_unit, source.mode.limit_mode().unit_symbol()) {
            messages.push(format!(
                "{} {}: limit unit '{}' does not match mode {}",
                tab,
                role,
                source.limit_unit,
                source.mode.scpi()
            ));
        }
        if source.limit <= 0.0 {
            messages.push(format!("{} {}: limit must be positive", tab, role));
        }
    }
    messages
}

fn sweep_rules(graph: &DeviceGraph, tab: &str) -> Vec<String> {
    let mut messages = Vec::new();
    let Some(sweep) = graph.sweep(tab) else {
        messages.push(format!("{}: sweep settings missing", tab));
        return messages;
    };

    if sweep.min >= sweep.max {
        messages.push(format!("{}: sweep min {} must be below max {}", tab, sweep.min, sweep.max));
    }
    if sweep.step <= 0.0 {
        messages.push(format!("{}: sweep step must be positive", tab));
    } else if sweep.min < sweep.max {
        let span = Nanos::from_f64(sweep.max).0 - Nanos::from_f64(sweep.min).0;
        let step = Nanos::from_f64(sweep.step).0;
        if step == 0 || span / step < 1 {
            messages.push(format!("{}: sweep step {} leaves no step within the span", tab, sweep.step));
        }
    }
    if sweep.step_time <= 0.0 {
        messages.push(format!("{}: step time must be non-zero", tab));
    }
    if let Some(detrel) = graph.detect_release(tab) {
        if detrel.check_time <= 0.0 {
            messages.push(format!("{}: check time must be non-zero", tab));
        }
        for aux in detrel.aux_sources() {
            if graph.source(&aux.role_id, tab).is_none() {
                messages.push(format!("{}: detect/release source {} has no settings", tab, aux.role_id));
            }
        }
    }

    let sweeping = sources(graph, tab).filter(|(_, s)| s.is_sweep()).count();
    let pulse_enabled = graph.pulse(tab).is_some_and(|p| p.enabled);
    if sweeping > 1 {
        messages.push(format!("{}: only one source may sweep, found {}", tab, sweeping));
    } else if sweeping == 0 && !pulse_enabled {
        messages.push(format!("{}: no sweep source and no enabled pulse generator", tab));
    }

    if !sweep.normal_sweep && graph.osc(tab).is_none() {
        messages.push(format!("{}: trigger search needs {} settings", tab, ROLE_OSC));
    }
    messages
}

/// A Sweep run drives exactly one swept quantity: a source or the pulse levels.
fn sweep_target_rules(graph: &DeviceGraph, tab: &str) -> Vec<String> {
    let pulse_enabled = graph.pulse(tab).is_some_and(|p| p.enabled);
    match sources(graph, tab).find(|(_, s)| s.is_sweep()) {
        Some((role, _)) if pulse_enabled => vec![format!(
            "{} {}: sweep source and enabled pulse generator are exclusive",
            tab, role
        )],
        _ => Vec::new(),
    }
}

fn delay_rules(graph: &DeviceGraph, tab: &str) -> Vec<String> {
    let mut messages = Vec::new();
    match graph.osc(tab) {
        None => messages.push(format!("{}: delay measurement needs {} settings", tab, ROLE_OSC)),
        Some(osc) => {
            if osc.time_per_div <= 0.0 {
                messages.push(format!("{}: time per division must be positive", tab));
            }
            match &osc.delay {
                None => messages.push(format!("{}: oscilloscope delay measurement missing", tab)),
                Some(delay) if delay.window_start >= delay.window_end => messages.push(format!(
                    "{}: delay window start {} must be before end {}",
                    tab, delay.window_start, delay.window_end
                )),
                Some(_) => {}
            }
        }
    }
    if !graph.pulse(tab).is_some_and(|p| p.enabled) {
        messages.push(format!("{}: delay measurement needs an enabled pulse generator", tab));
    }
    messages
}

fn vi_rules(graph: &DeviceGraph, tab: &str) -> Vec<String> {
    let mut messages = Vec::new();
    match graph.vi(tab) {
        None => messages.push(format!("{}: VI settings missing", tab)),
        Some(vi) if vi.standby_time < 0.0 => {
            messages.push(format!("{}: standby time must not be negative", tab))
        }
        Some(_) => {}
    }
    let dmms = graph
        .of_kind(RoleKind::Multimeter)
        .filter(|d| d.settings(tab).and_then(|s| s.as_dmm()).is_some())
        .count();
    if dmms == 0 {
        messages.push(format!("{}: VI measurement needs at least one multimeter", tab));
    }
    if let Some((role, _)) = sources(graph, tab).find(|(_, s)| s.is_sweep()) {
        messages.push(format!("{} {}: sweep action is not allowed in a VI measurement", tab, role));
    }
    messages
}
