//! Energy EVSE cluster surface
//!
//! Applies feature gating, validates command arguments and forwards to an
//! [`EvseDelegate`]. Attributes hidden by the feature map read as
//! `UnsupportedAttribute`; commands that are not accepted are rejected with
//! `UnsupportedCommand` before the delegate sees them.

use super::attributes::{AttributeId, AttributeValue};
use super::delegate::EvseDelegate;
use super::targets::{ChargingTargetSchedule, validate_targets};
use crate::config::EvseFeatures;
use crate::error::{CommandError, CommandResult, WriteOutcome};
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use serde::{Deserialize, Serialize};

/// Command identifiers of the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvseCommandId {
    Disable,
    EnableCharging,
    EnableDischarging,
    StartDiagnostics,
    SetTargets,
    GetTargets,
    ClearTargets,
}

/// An invoked cluster command with its arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum EvseRequest {
    Disable,
    EnableCharging {
        charging_enabled_until: Option<u32>,
        minimum_charge_current: i64,
        maximum_charge_current: i64,
    },
    EnableDischarging {
        discharging_enabled_until: Option<u32>,
        maximum_discharge_current: i64,
    },
    StartDiagnostics,
    SetTargets {
        schedules: Vec<ChargingTargetSchedule>,
    },
    GetTargets,
    ClearTargets,
}

impl EvseRequest {
    pub fn id(&self) -> EvseCommandId {
        match self {
            EvseRequest::Disable => EvseCommandId::Disable,
            EvseRequest::EnableCharging { .. } => EvseCommandId::EnableCharging,
            EvseRequest::EnableDischarging { .. } => EvseCommandId::EnableDischarging,
            EvseRequest::StartDiagnostics => EvseCommandId::StartDiagnostics,
            EvseRequest::SetTargets { .. } => EvseCommandId::SetTargets,
            EvseRequest::GetTargets => EvseCommandId::GetTargets,
            EvseRequest::ClearTargets => EvseCommandId::ClearTargets,
        }
    }
}

/// Successful command response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum EvseResponse {
    Ok,
    Targets(Vec<ChargingTargetSchedule>),
}

pub struct EnergyEvseCluster<D: EvseDelegate> {
    features: EvseFeatures,
    delegate: D,
    logger: StructuredLogger,
}

impl<D: EvseDelegate> EnergyEvseCluster<D> {
    pub fn new(endpoint: u16, features: EvseFeatures, delegate: D) -> Self {
        Self {
            features,
            delegate,
            logger: get_logger_with_context(
                LogContext::new("evse_cluster").with_endpoint(endpoint),
            ),
        }
    }

    pub fn features(&self) -> EvseFeatures {
        self.features
    }

    pub fn delegate(&self) -> &D {
        &self.delegate
    }

    pub fn delegate_mut(&mut self) -> &mut D {
        &mut self.delegate
    }

    pub fn into_delegate(self) -> D {
        self.delegate
    }

    /// Whether `id` is present under the configured features
    pub fn supports_attribute(&self, id: AttributeId) -> bool {
        let f = &self.features;
        match id {
            AttributeId::DischargingEnabledUntil
            | AttributeId::MaximumDischargeCurrent
            | AttributeId::SessionEnergyDischarged => f.v2x,
            AttributeId::NextChargeStartTime
            | AttributeId::NextChargeTargetTime
            | AttributeId::NextChargeRequiredEnergy
            | AttributeId::NextChargeTargetSoC => f.charging_preferences,
            AttributeId::ApproximateEvEfficiency => {
                f.charging_preferences && f.approximate_ev_efficiency
            }
            AttributeId::StateOfCharge | AttributeId::BatteryCapacity => f.soc_reporting,
            AttributeId::VehicleId => f.plug_and_charge,
            AttributeId::UserMaximumChargeCurrent => f.user_max_charging_current,
            AttributeId::RandomizationDelayWindow => f.randomization_window,
            _ => true,
        }
    }

    /// Attributes present under the configured features
    pub fn attribute_list(&self) -> Vec<AttributeId> {
        AttributeId::ALL
            .into_iter()
            .filter(|id| self.supports_attribute(*id))
            .collect()
    }

    pub fn read_attribute(&self, id: AttributeId) -> CommandResult<AttributeValue> {
        if !self.supports_attribute(id) {
            return Err(CommandError::UnsupportedAttribute);
        }
        Ok(self.delegate.attributes().value(id))
    }

    pub fn write_user_maximum_charge_current(&mut self, value: i64) -> CommandResult<WriteOutcome> {
        self.require_attribute(AttributeId::UserMaximumChargeCurrent)?;
        if value < 0 {
            return Err(CommandError::ConstraintError);
        }
        Self::outcome(self.delegate.write_user_maximum_charge_current(value)?)
    }

    pub fn write_randomization_delay_window(&mut self, value: u32) -> CommandResult<WriteOutcome> {
        self.require_attribute(AttributeId::RandomizationDelayWindow)?;
        Self::outcome(self.delegate.write_randomization_delay_window(value)?)
    }

    pub fn write_approximate_ev_efficiency(
        &mut self,
        value: Option<u16>,
    ) -> CommandResult<WriteOutcome> {
        self.require_attribute(AttributeId::ApproximateEvEfficiency)?;
        Self::outcome(self.delegate.write_approximate_ev_efficiency(value)?)
    }

    /// Commands accepted under the configured features
    pub fn accepted_commands(&self) -> Vec<EvseCommandId> {
        let mut commands = vec![EvseCommandId::Disable, EvseCommandId::EnableCharging];
        if self.features.v2x {
            commands.push(EvseCommandId::EnableDischarging);
        }
        if self.features.start_diagnostics {
            commands.push(EvseCommandId::StartDiagnostics);
        }
        if self.features.charging_preferences {
            commands.extend([
                EvseCommandId::SetTargets,
                EvseCommandId::GetTargets,
                EvseCommandId::ClearTargets,
            ]);
        }
        commands
    }

    pub fn invoke(&mut self, request: EvseRequest) -> CommandResult<EvseResponse> {
        let id = request.id();
        if !self.accepted_commands().contains(&id) {
            self.logger
                .warn(&format!("Command {:?} is not supported", id));
            return Err(CommandError::UnsupportedCommand);
        }
        self.logger.debug(&format!("Invoke {:?}", id));

        let result = match request {
            EvseRequest::Disable => self.delegate.disable(),
            EvseRequest::EnableCharging {
                charging_enabled_until,
                minimum_charge_current,
                maximum_charge_current,
            } => {
                if minimum_charge_current < 0
                    || maximum_charge_current < 0
                    || minimum_charge_current > maximum_charge_current
                {
                    Err(CommandError::ConstraintError)
                } else {
                    self.delegate.enable_charging(
                        charging_enabled_until,
                        minimum_charge_current,
                        maximum_charge_current,
                    )
                }
            }
            EvseRequest::EnableDischarging {
                discharging_enabled_until,
                maximum_discharge_current,
            } => {
                if maximum_discharge_current < 0 {
                    Err(CommandError::ConstraintError)
                } else {
                    self.delegate
                        .enable_discharging(discharging_enabled_until, maximum_discharge_current)
                }
            }
            EvseRequest::StartDiagnostics => self.delegate.start_diagnostics(),
            EvseRequest::SetTargets { schedules } => {
                validate_targets(&schedules, self.features.soc_reporting)
                    .and_then(|()| self.delegate.set_targets(&schedules))
            }
            EvseRequest::GetTargets => {
                return self.delegate.get_targets().map(EvseResponse::Targets);
            }
            EvseRequest::ClearTargets => self.delegate.clear_targets(),
        };

        result
            .inspect_err(|e| {
                self.logger
                    .warn(&format!("Command {:?} rejected: {}", id, e));
            })
            .map(|()| EvseResponse::Ok)
    }

    fn require_attribute(&self, id: AttributeId) -> CommandResult {
        if self.supports_attribute(id) {
            Ok(())
        } else {
            Err(CommandError::UnsupportedAttribute)
        }
    }

    fn outcome(changed: bool) -> CommandResult<WriteOutcome> {
        Ok(if changed {
            WriteOutcome::Written
        } else {
            WriteOutcome::NoOp
        })
    }
}
