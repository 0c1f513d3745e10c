//! Named control axes
//!
//! One axis per control input. Producers address axes by [`AxisId`] or by
//! its stable string name; synthesizers hold the catalog and read what they
//! need.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::temporal::{ConstantAxis, Interpolation, SharedAxis, TemporalAxis};
use crate::config::AxisConfig;
use crate::time::SharedTime;

macro_rules! axis_ids {
    ($( $variant:ident => $name:literal, $default:expr, $kind:ident; )*) => {
        /// Identifier of a control axis
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum AxisId {
            $( $variant, )*
        }

        impl AxisId {
            pub const ALL: &'static [AxisId] = &[$( AxisId::$variant, )*];

            pub fn name(self) -> &'static str {
                match self {
                    $( AxisId::$variant => $name, )*
                }
            }

            pub fn from_name(name: &str) -> Option<AxisId> {
                match name {
                    $( $name => Some(AxisId::$variant), )*
                    _ => None,
                }
            }

            /// Value an axis holds before any producer writes to it
            pub fn default_value(self) -> f64 {
                match self {
                    $( AxisId::$variant => $default, )*
                }
            }

            fn kind(self) -> AxisKind {
                match self {
                    $( AxisId::$variant => AxisKind::$kind, )*
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AxisKind {
    Linear,
    Hold,
    Constant,
}

axis_ids! {
    PositionAlpha => "position.alpha", 0.0, Linear;
    PositionBeta => "position.beta", 0.0, Linear;
    PositionGamma => "position.gamma", 0.0, Linear;
    Electrode1 => "intensity.e1", 1.0, Linear;
    Electrode2 => "intensity.e2", 1.0, Linear;
    Electrode3 => "intensity.e3", 1.0, Linear;
    Electrode4 => "intensity.e4", 1.0, Linear;
    Electrode5 => "intensity.e5", 1.0, Linear;
    VolumeApi => "volume.api", 1.0, Linear;
    VolumeMaster => "volume.master", 0.0, Linear;
    VolumeInactivity => "volume.inactivity", 1.0, Linear;
    VolumeExternal => "volume.external", 1.0, Linear;
    CarrierFrequency => "carrier.frequency", 700.0, Linear;
    PulseFrequency => "pulse.frequency", 50.0, Linear;
    PulseWidth => "pulse.width", 6.0, Hold;
    PulseRiseTime => "pulse.rise_time", 2.0, Hold;
    PulseIntervalRandom => "pulse.interval_random", 0.1, Hold;
    Calib3Neutral => "calibrate.3phase.neutral", 0.0, Constant;
    Calib3Right => "calibrate.3phase.right", 0.0, Constant;
    Calib3Center => "calibrate.3phase.center", 0.0, Constant;
    CalibPhaseShared => "calibrate.nphase.t", 0.0, Constant;
    CalibPhaseS1 => "calibrate.nphase.s1", 1.0, Constant;
    CalibPhaseS2 => "calibrate.nphase.s2", 1.0, Constant;
    CalibPhaseS3 => "calibrate.nphase.s3", 1.0, Constant;
    CalibPhaseS4 => "calibrate.nphase.s4", 1.0, Constant;
    CalibPhaseS5 => "calibrate.nphase.s5", 1.0, Constant;
    Vibration1Frequency => "vibration.1.frequency", 10.0, Linear;
    Vibration1Strength => "vibration.1.strength", 0.0, Linear;
    Vibration2Frequency => "vibration.2.frequency", 10.0, Linear;
    Vibration2Strength => "vibration.2.strength", 0.0, Linear;
}

impl AxisId {
    pub const ELECTRODES: [AxisId; 5] = [
        AxisId::Electrode1,
        AxisId::Electrode2,
        AxisId::Electrode3,
        AxisId::Electrode4,
        AxisId::Electrode5,
    ];

    pub const PHASE_TERMS: [AxisId; 5] = [
        AxisId::CalibPhaseS1,
        AxisId::CalibPhaseS2,
        AxisId::CalibPhaseS3,
        AxisId::CalibPhaseS4,
        AxisId::CalibPhaseS5,
    ];

    pub const VOLUMES: [AxisId; 4] = [
        AxisId::VolumeMaster,
        AxisId::VolumeApi,
        AxisId::VolumeInactivity,
        AxisId::VolumeExternal,
    ];
}

impl fmt::Display for AxisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AxisId {
    type Err = UnknownAxis;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AxisId::from_name(s).ok_or_else(|| UnknownAxis(s.to_string()))
    }
}

/// Name that does not match any [`AxisId`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown axis: {0}")]
pub struct UnknownAxis(pub String);

/// Every control axis of one session
#[derive(Clone)]
pub struct AxisCatalog {
    axes: Vec<SharedAxis>,
    time: SharedTime,
}

impl AxisCatalog {
    pub fn new(time: SharedTime, config: &AxisConfig) -> Self {
        let axes = AxisId::ALL
            .iter()
            .map(|&id| -> SharedAxis {
                let initial = id.default_value();
                match id.kind() {
                    AxisKind::Linear => Arc::new(TemporalAxis::new(
                        initial,
                        Interpolation::Linear,
                        time.clone(),
                        *config,
                    )),
                    AxisKind::Hold => Arc::new(TemporalAxis::new(
                        initial,
                        Interpolation::Hold,
                        time.clone(),
                        *config,
                    )),
                    AxisKind::Constant => Arc::new(ConstantAxis::new(initial)),
                }
            })
            .collect();
        Self { axes, time }
    }

    pub fn axis(&self, id: AxisId) -> &SharedAxis {
        &self.axes[id as usize]
    }

    /// Schedule `value` on `id` at `now + delay`
    pub fn set(&self, id: AxisId, value: f64, delay: f64) {
        self.axis(id).add(value, delay);
    }

    /// [`AxisCatalog::set`] addressed by name
    pub fn set_by_name(&self, name: &str, value: f64, delay: f64) -> Result<(), UnknownAxis> {
        let id: AxisId = name.parse()?;
        self.set(id, value, delay);
        Ok(())
    }

    pub fn interpolate(&self, id: AxisId, t: f64) -> f64 {
        self.axis(id).interpolate(t)
    }

    pub fn last_value(&self, id: AxisId) -> f64 {
        self.axis(id).last_value()
    }

    pub fn time(&self) -> &SharedTime {
        &self.time
    }

    /// Current time of the catalog clock
    pub fn now(&self) -> f64 {
        self.time.now()
    }
}
