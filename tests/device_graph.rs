//! Device graph construction from checked instruments and tab configs.

mod common;

use common::*;
use tempchar_daq::graph::{RoleKind, ROLE_DETREL, ROLE_SWEEP};
use tempchar_daq::settings::{SourceAction, SourceRange, TriggerSource};
use tempchar_daq::{combine_device_data, CheckedInstrument, TabConfig};

fn tabs() -> Vec<TabConfig> {
    vec![
        TabConfig::new("Item1")
            .with("SOURCE1", source(SourceAction::Sweep, 0.0, SourceRange::Auto))
            .with("DMM1", dmm(TriggerSource::Imm))
            .with("SWEEP", sweep(0.0, 1.0, 0.1, true)),
        TabConfig::new("Item2").with("source1", source(SourceAction::NotUsed, 0.0, SourceRange::Auto)),
    ]
}

#[test]
fn test_nothing_checked_is_empty() {
    let graph = combine_device_data(&[], &tabs());
    assert!(graph.is_empty());
    assert!(graph.device_list().is_empty());
}

#[test]
fn test_no_tabs_is_empty() {
    let checked = vec![CheckedInstrument::new("SOURCE1", SOURCE_ADDR, "B2902A")];
    assert!(combine_device_data(&checked, &[]).is_empty());
}

#[test]
fn test_virtual_roles_are_added_without_address() {
    let checked = vec![
        CheckedInstrument::new("SOURCE1", SOURCE_ADDR, "B2902A"),
        CheckedInstrument::new("DMM1", DMM_ADDR, "34461A"),
    ];
    let graph = combine_device_data(&checked, &tabs());

    let sweep = graph.device(ROLE_SWEEP).unwrap();
    assert_eq!(sweep.bus_address, None);
    assert_eq!(sweep.kind(), Some(RoleKind::Virtual));
    assert!(graph.device(ROLE_DETREL).is_some());
    assert!(graph.sweep("Item1").is_some());
    assert!(graph.sweep("Item2").is_none());

    // device list only carries hardware
    let list = graph.device_list();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0], ["SOURCE1".to_string(), SOURCE_ADDR.to_string(), "B2902A".to_string()]);
}

#[test]
fn test_role_lookup_ignores_case() {
    let checked = vec![CheckedInstrument::new("SOURCE1", SOURCE_ADDR, "B2902A")];
    let graph = combine_device_data(&checked, &tabs());
    let item2 = graph.source("SOURCE1", "Item2").unwrap();
    assert_eq!(item2.action, SourceAction::NotUsed);
    // DMM1 was not checked, so its settings are dropped
    assert!(graph.dmm("DMM1", "Item1").is_none());
}

#[test]
fn test_set_source_value_updates_one_tab() {
    let checked = vec![CheckedInstrument::new("SOURCE1", SOURCE_ADDR, "B2902A")];
    let mut graph = combine_device_data(&checked, &tabs());
    assert!(graph.set_source_value("SOURCE1", "Item1", 0.25));
    assert_eq!(graph.source("SOURCE1", "Item1").unwrap().value, 0.25);
    assert_eq!(graph.source("SOURCE1", "Item2").unwrap().value, 0.0);
    assert!(!graph.set_source_value("SOURCE1", "Missing", 1.0));
}
