//! Device graph: the checked instruments merged with per-tab settings.
//!
//! The graph is built once per orchestrator run, mutated in place while the
//! run progresses (sweep/search rewrite source values) and dropped at the end.
//! It is never shared between concurrent runs.

use crate::settings::{
    ChamberSettings, DetectReleaseSettings, MultimeterSettings, OscilloscopeSettings,
    PulseGeneratorSettings, Settings, SourceSettings, SweepSettings, ViSettings,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Sweep window settings.
pub const ROLE_SWEEP: &str = "SWEEP";
/// Detect/release sequence settings.
pub const ROLE_DETREL: &str = "DETREL";
/// VI snapshot settings.
pub const ROLE_VI: &str = "VI";
/// The oscilloscope.
pub const ROLE_OSC: &str = "OSC";
/// The pulse generator.
pub const ROLE_PULSE: &str = "PULSE";
/// The thermal chamber.
pub const ROLE_CHAMBER: &str = "CHAMBER";

/// Instrument family a role id belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoleKind {
    /// `SOURCE<n>`.
    Source,
    /// `OSC`.
    Oscilloscope,
    /// `PULSE`.
    PulseGenerator,
    /// `DMM<n>`.
    Multimeter,
    /// `CHAMBER`.
    ThermalChamber,
    /// Settings-only role without hardware (`SWEEP`, `DETREL`, `VI`).
    Virtual,
}

impl RoleKind {
    /// Classifies a role id such as `SOURCE2`, `DMM1` or `OSC`.
    pub fn of(role_id: &str) -> Option<RoleKind> {
        let upper = role_id.to_ascii_uppercase();
        match upper.as_str() {
            ROLE_OSC => Some(RoleKind::Oscilloscope),
            ROLE_PULSE => Some(RoleKind::PulseGenerator),
            ROLE_CHAMBER => Some(RoleKind::ThermalChamber),
            ROLE_SWEEP | ROLE_DETREL | ROLE_VI => Some(RoleKind::Virtual),
            _ if numbered(&upper, "SOURCE") => Some(RoleKind::Source),
            _ if numbered(&upper, "DMM") => Some(RoleKind::Multimeter),
            _ => None,
        }
    }

    /// Whether the role is backed by an instrument.
    pub fn is_hardware(self) -> bool {
        self != RoleKind::Virtual
    }
}

fn numbered(role_id: &str, prefix: &str) -> bool {
    role_id
        .strip_prefix(prefix)
        .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
}

/// One instrument the operator enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckedInstrument {
    /// Role id such as `SOURCE1`.
    pub role_id: String,
    /// VISA resource string.
    pub bus_address: String,
    /// Model name for the device list.
    #[serde(default)]
    pub display_name: String,
}

impl CheckedInstrument {
    /// A checked instrument from its three identifying strings.
    pub fn new(
        role_id: impl Into<String>,
        bus_address: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            role_id: role_id.into(),
            bus_address: bus_address.into(),
            display_name: display_name.into(),
        }
    }
}

/// Normalised settings for one measurement condition.
#[derive(Debug, Clone, PartialEq)]
pub struct TabConfig {
    /// Tab name as shown to the operator.
    pub name: String,
    /// Settings keyed by role id, in configuration order.
    pub settings: Vec<(String, Settings)>,
}

impl TabConfig {
    /// An empty tab.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            settings: Vec::new(),
        }
    }

    /// Add settings for `role_id`.
    pub fn with(mut self, role_id: impl Into<String>, settings: Settings) -> Self {
        self.settings.push((role_id.into(), settings));
        self
    }

    fn get(&self, role_id: &str) -> Option<&Settings> {
        self.settings
            .iter()
            .find(|(role, _)| role.eq_ignore_ascii_case(role_id))
            .map(|(_, settings)| settings)
    }
}

/// One instrument role instance and its per-tab settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    /// Role id such as `SOURCE1` or `SWEEP`.
    pub role_id: String,
    /// `None` for virtual roles that hold settings only.
    pub bus_address: Option<String>,
    /// Model name, empty for virtual roles.
    pub display_name: String,
    /// Settings keyed by tab name.
    pub settings_by_tab: BTreeMap<String, Settings>,
}

impl Device {
    /// Family of the role, if the id is recognised.
    pub fn kind(&self) -> Option<RoleKind> {
        RoleKind::of(&self.role_id)
    }

    /// Settings for `tab`, if any.
    pub fn settings(&self, tab: &str) -> Option<&Settings> {
        self.settings_by_tab.get(tab)
    }
}

/// The merged device/settings graph for one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceGraph {
    devices: Vec<Device>,
}

impl DeviceGraph {
    /// Whether the graph has no devices.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// All devices in graph order.
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Device by role id, ignoring case.
    pub fn device(&self, role_id: &str) -> Option<&Device> {
        self.devices
            .iter()
            .find(|d| d.role_id.eq_ignore_ascii_case(role_id))
    }

    fn device_mut(&mut self, role_id: &str) -> Option<&mut Device> {
        self.devices
            .iter_mut()
            .find(|d| d.role_id.eq_ignore_ascii_case(role_id))
    }

    /// Hardware-backed devices in graph order.
    pub fn hardware(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter().filter(|d| d.bus_address.is_some())
    }

    /// Devices of one family in graph order.
    pub fn of_kind(&self, kind: RoleKind) -> impl Iterator<Item = &Device> {
        self.devices
            .iter()
            .filter(move |d| d.kind() == Some(kind))
    }

    /// Whether any device carries settings for `tab`.
    pub fn has_tab(&self, tab: &str) -> bool {
        self.devices
            .iter()
            .any(|d| d.settings_by_tab.contains_key(tab))
    }

    /// Settings of `role_id` on `tab`.
    pub fn settings(&self, role_id: &str, tab: &str) -> Option<&Settings> {
        self.device(role_id).and_then(|d| d.settings(tab))
    }

    /// Source settings of `role_id` on `tab`.
    pub fn source(&self, role_id: &str, tab: &str) -> Option<&SourceSettings> {
        self.settings(role_id, tab).and_then(Settings::as_source)
    }

    /// Oscilloscope settings on `tab`.
    pub fn osc(&self, tab: &str) -> Option<&OscilloscopeSettings> {
        self.settings(ROLE_OSC, tab).and_then(Settings::as_osc)
    }

    /// Pulse generator settings on `tab`.
    pub fn pulse(&self, tab: &str) -> Option<&PulseGeneratorSettings> {
        self.settings(ROLE_PULSE, tab).and_then(Settings::as_pulse)
    }

    /// Multimeter settings of `role_id` on `tab`.
    pub fn dmm(&self, role_id: &str, tab: &str) -> Option<&MultimeterSettings> {
        self.settings(role_id, tab).and_then(Settings::as_dmm)
    }

    /// Detect/release settings on `tab`.
    pub fn detect_release(&self, tab: &str) -> Option<&DetectReleaseSettings> {
        self.settings(ROLE_DETREL, tab)
            .and_then(Settings::as_detect_release)
    }

    /// Sweep settings on `tab`.
    pub fn sweep(&self, tab: &str) -> Option<&SweepSettings> {
        self.settings(ROLE_SWEEP, tab).and_then(Settings::as_sweep)
    }

    /// VI settings on `tab`.
    pub fn vi(&self, tab: &str) -> Option<&ViSettings> {
        self.settings(ROLE_VI, tab).and_then(Settings::as_vi)
    }

    /// Chamber settings on `tab`.
    pub fn chamber(&self, tab: &str) -> Option<&ChamberSettings> {
        self.settings(ROLE_CHAMBER, tab).and_then(Settings::as_chamber)
    }

    /// Rewrites the output level of a source for one tab.
    ///
    /// Returns `false` if the device has no source settings on that tab.
    pub fn set_source_value(&mut self, role_id: &str, tab: &str, value: f64) -> bool {
        match self
            .device_mut(role_id)
            .and_then(|d| d.settings_by_tab.get_mut(tab))
            .and_then(Settings::as_source_mut)
        {
            Some(source) => {
                source.value = value;
                true
            }
            None => false,
        }
    }

    /// The `DeviceList` header rows: `role_id,bus_address,display_name`.
    pub fn device_list(&self) -> Vec<[String; 3]> {
        self.hardware()
            .map(|d| {
                [
                    d.role_id.clone(),
                    d.bus_address.clone().unwrap_or_default(),
                    d.display_name.clone(),
                ]
            })
            .collect()
    }
}

/// Builds a [`DeviceGraph`] from the checked instruments and tab configs.
///
/// Virtual roles requested by the orchestrator are always added (without a bus
/// address) once there is something to measure; their per-tab settings come
/// from the tab configs like any other role.
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    virtual_roles: Vec<&'static str>,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new(&[ROLE_SWEEP, ROLE_DETREL])
    }
}

impl GraphBuilder {
    /// A builder that adds `virtual_roles` when tabs configure them.
    pub fn new(virtual_roles: &[&'static str]) -> Self {
        Self {
            virtual_roles: virtual_roles.to_vec(),
        }
    }

    /// Merge checked instruments with per-tab settings.
    ///
    /// Returns an empty graph when nothing is checked or no tab is supplied;
    /// callers treat that as "nothing to measure".
    pub fn build(&self, checked: &[CheckedInstrument], tabs: &[TabConfig]) -> DeviceGraph {
        let mut graph = DeviceGraph::default();
        if checked.is_empty() || tabs.is_empty() {
            return graph;
        }

        for instrument in checked {
            if graph.device(&instrument.role_id).is_some() {
                debug!(role = %instrument.role_id, "duplicate checked instrument ignored");
                continue;
            }
            let virtual_role = RoleKind::of(&instrument.role_id) == Some(RoleKind::Virtual);
            graph.devices.push(Device {
                role_id: instrument.role_id.clone(),
                bus_address: (!virtual_role && !instrument.bus_address.is_empty())
                    .then(|| instrument.bus_address.clone()),
                display_name: instrument.display_name.clone(),
                settings_by_tab: BTreeMap::new(),
            });
        }

        for role in &self.virtual_roles {
            if graph.device(role).is_none() {
                graph.devices.push(Device {
                    role_id: (*role).to_string(),
                    bus_address: None,
                    display_name: (*role).to_string(),
                    settings_by_tab: BTreeMap::new(),
                });
            }
        }

        for tab in tabs {
            for device in graph.devices.iter_mut() {
                if let Some(settings) = tab.get(&device.role_id) {
                    device
                        .settings_by_tab
                        .insert(tab.name.clone(), settings.clone());
                }
            }
        }

        debug!(
            devices = graph.devices.len(),
            tabs = tabs.len(),
            "device graph built"
        );
        graph
    }
}

/// Builds the graph with the default virtual roles (`SWEEP`, `DETREL`).
pub fn combine_device_data(checked: &[CheckedInstrument], tabs: &[TabConfig]) -> DeviceGraph {
    GraphBuilder::default().build(checked, tabs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{SweepDirection, ViSettings};

    fn sweep_settings() -> Settings {
        Settings::Sweep(SweepSettings {
            normal_sweep: true,
            min: 0.0,
            max: 1.0,
            step: 0.1,
            step_time: 0.01,
            standby_time: 0.0,
            direction: SweepDirection::Rise,
        })
    }

    #[test]
    fn test_role_kind_classification() {
        assert_eq!(RoleKind::of("SOURCE1"), Some(RoleKind::Source));
        assert_eq!(RoleKind::of("DMM2"), Some(RoleKind::Multimeter));
        assert_eq!(RoleKind::of("OSC"), Some(RoleKind::Oscilloscope));
        assert_eq!(RoleKind::of("DETREL"), Some(RoleKind::Virtual));
        assert_eq!(RoleKind::of("SOURCE"), None);
        assert_eq!(RoleKind::of("PRINTER"), None);
    }

    #[test]
    fn test_empty_inputs_give_empty_graph() {
        let tabs = vec![TabConfig::new("Item1").with(ROLE_SWEEP, sweep_settings())];
        assert!(combine_device_data(&[], &tabs).is_empty());

        let checked = vec![CheckedInstrument::new("SOURCE1", "GPIB0::5::INSTR", "src")];
        assert!(combine_device_data(&checked, &[]).is_empty());
    }

    #[test]
    fn test_virtual_devices_are_added() {
        let checked = vec![CheckedInstrument::new("SOURCE1", "GPIB0::5::INSTR", "src")];
        let tabs = vec![TabConfig::new("Item1").with(ROLE_SWEEP, sweep_settings())];
        let graph = combine_device_data(&checked, &tabs);

        assert!(!graph.is_empty());
        let sweep = graph.device(ROLE_SWEEP).expect("SWEEP device");
        assert!(sweep.bus_address.is_none());
        assert!(graph.device(ROLE_DETREL).is_some());
        assert!(graph.sweep("Item1").is_some());
        assert_eq!(graph.device_list().len(), 1);
    }

    #[test]
    fn test_settings_only_for_checked_roles() {
        let checked = vec![CheckedInstrument::new("DMM1", "GPIB0::22::INSTR", "dmm")];
        let tabs = vec![TabConfig::new("Item1")
            .with(ROLE_VI, Settings::Vi(ViSettings { standby_time: 0.5 }))
            .with("DMM2", Settings::Vi(ViSettings { standby_time: 0.5 }))];
        let graph = GraphBuilder::new(&[ROLE_VI]).build(&checked, &tabs);

        assert!(graph.vi("Item1").is_some());
        assert!(graph.device("DMM2").is_none());
        assert!(graph.settings("DMM1", "Item1").is_none());
    }

    #[test]
    fn test_last_tab_config_wins_per_device_and_tab() {
        let checked = vec![CheckedInstrument::new("SOURCE1", "GPIB0::5::INSTR", "src")];
        let tabs = vec![
            TabConfig::new("Item1").with(ROLE_VI, Settings::Vi(ViSettings { standby_time: 1.0 })),
            TabConfig::new("Item1").with(ROLE_VI, Settings::Vi(ViSettings { standby_time: 2.0 })),
        ];
        let graph = GraphBuilder::new(&[ROLE_VI]).build(&checked, &tabs);
        assert_eq!(graph.vi("Item1").map(|v| v.standby_time), Some(2.0));
        assert_eq!(graph.device(ROLE_VI).map(|d| d.settings_by_tab.len()), Some(1));
    }
}
