use serde::{Deserialize, Serialize};

/// What the battery does during one quarter-hour slot.
///
/// Exhaustive matching in the optimizer, the driver mapping and the savings
/// summary keeps a new action from slipping through unhandled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotAction {
    Idle,
    ChargeGrid,
    ChargeSolar,
    Discharge,
    Sell,
}

impl SlotAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ChargeGrid => "charge_grid",
            Self::ChargeSolar => "charge_solar",
            Self::Discharge => "discharge",
            Self::Sell => "sell",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(Self::Idle),
            "charge_grid" => Some(Self::ChargeGrid),
            "charge_solar" => Some(Self::ChargeSolar),
            "discharge" => Some(Self::Discharge),
            "sell" => Some(Self::Sell),
            _ => None,
        }
    }
}

/// One planned quarter-hour of the battery schedule, with the price and
/// forecast snapshot the optimizer saw when it planned the slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSlot {
    pub slot_ts: String,
    pub action: SlotAction,
    /// Commanded power, always non-negative; the action carries the sign.
    pub target_w: f64,
    pub soc_start_pct: f64,
    pub soc_end_pct: f64,
    pub price: f64,
    pub solar_w: f64,
    pub consumption_w: f64,
}

impl ScheduleSlot {
    /// The slot active at `now`: the latest slot starting at or before it.
    pub fn current<'a>(slots: &'a [ScheduleSlot], now: &str) -> Option<&'a ScheduleSlot> {
        slots
            .iter()
            .filter(|s| s.slot_ts.as_str() <= now)
            .max_by(|a, b| a.slot_ts.cmp(&b.slot_ts))
            .or_else(|| slots.first())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(ts: &str) -> ScheduleSlot {
        ScheduleSlot {
            slot_ts: ts.to_string(),
            action: SlotAction::Idle,
            target_w: 0.0,
            soc_start_pct: 50.0,
            soc_end_pct: 50.0,
            price: 0.2,
            solar_w: 0.0,
            consumption_w: 400.0,
        }
    }

    #[test]
    fn action_strings_round_trip() {
        for action in [
            SlotAction::Idle,
            SlotAction::ChargeGrid,
            SlotAction::ChargeSolar,
            SlotAction::Discharge,
            SlotAction::Sell,
        ] {
            assert_eq!(SlotAction::parse(action.as_str()), Some(action));
        }
        assert_eq!(SlotAction::parse("charge"), None);
    }

    #[test]
    fn current_prefers_latest_started_slot() {
        let slots = vec![
            slot("2025-05-01T10:00"),
            slot("2025-05-01T10:15"),
            slot("2025-05-01T10:30"),
        ];
        let hit = ScheduleSlot::current(&slots, "2025-05-01T10:20").unwrap();
        assert_eq!(hit.slot_ts, "2025-05-01T10:15");
    }

    #[test]
    fn current_falls_back_to_first_future_slot() {
        let slots = vec![slot("2025-05-01T10:00"), slot("2025-05-01T10:15")];
        let hit = ScheduleSlot::current(&slots, "2025-05-01T09:00").unwrap();
        assert_eq!(hit.slot_ts, "2025-05-01T10:00");
    }
}
