//! The greedy planning pass.
//!
//! Charge/discharge slots are chosen by pairing the cheapest grid hours with
//! the most expensive deficit hours, as long as the price spread beats the
//! round-trip efficiency loss. A forward SOC pass then walks the day,
//! clipping every action to the battery envelope, and the savings summary is
//! computed from what survived the pass.

use anyhow::Result;
use std::collections::HashMap;

use crate::config::{BatteryConfig, GridConfig};
use crate::domain::{PriceSlot, ScheduleSlot, SlotAction};

/// Fraction of an hour per slot.
const SLOT_HOURS: f64 = 0.25;

#[derive(Debug)]
pub struct PlanInputs {
    /// The price slots of the window, chronological, one per quarter hour.
    pub prices: Vec<PriceSlot>,
    /// Hourly production forecast, kWh per hour key.
    pub solar_kwh_by_hour: HashMap<String, f64>,
    /// Hourly consumption estimate, W per hour key.
    pub consumption_w_by_hour: HashMap<String, f64>,
    /// Live SOC to seed the forward pass, percent.
    pub start_soc_pct: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct PlanSummary {
    /// Grid cost of the window with no battery at all.
    pub cost_without_battery: f64,
    /// Grid cost with the planned schedule, post-forward-pass.
    pub cost_with_battery: f64,
    pub savings: f64,
    pub pairs: usize,
    pub min_spread: f64,
}

#[derive(Debug)]
pub struct Plan {
    pub slots: Vec<ScheduleSlot>,
    pub summary: PlanSummary,
}

struct WorkSlot {
    ts: String,
    price: f64,
    buy: f64,
    sell: f64,
    solar_w: f64,
    consumption_w: f64,
    net_w: f64,
    avoidable_wh: f64,
    action: SlotAction,
    target_w: f64,
    soc_start_pct: f64,
    soc_end_pct: f64,
}

pub fn plan(
    battery: &BatteryConfig,
    grid: &GridConfig,
    flat_watts: f64,
    inputs: &PlanInputs,
) -> Result<Plan> {
    let mut slots = build_slots(battery, grid, flat_watts, inputs);
    let min_spread = minimum_spread(battery, &slots);
    let pairs = pair_greedy(battery, min_spread, &mut slots);
    assign_solar_charge(battery, &mut slots);
    forward_soc_pass(battery, grid, inputs.start_soc_pct, &mut slots);
    let summary = summarize(min_spread, pairs, &slots);

    let out = slots
        .into_iter()
        .map(|s| ScheduleSlot {
            slot_ts: s.ts,
            action: s.action,
            target_w: s.target_w,
            soc_start_pct: s.soc_start_pct,
            soc_end_pct: s.soc_end_pct,
            price: s.price,
            solar_w: s.solar_w,
            consumption_w: s.consumption_w,
        })
        .collect::<Vec<_>>();

    Ok(Plan { slots: out, summary })
}

/// Step 1–2: interpolate the hourly inputs onto the price slots and compute
/// the per-slot economics.
fn build_slots(
    battery: &BatteryConfig,
    grid: &GridConfig,
    flat_watts: f64,
    inputs: &PlanInputs,
) -> Vec<WorkSlot> {
    inputs
        .prices
        .iter()
        .map(|price_slot| {
            let hour_key = format!("{}00", &price_slot.slot_ts[..14]);
            let solar_w = inputs
                .solar_kwh_by_hour
                .get(&hour_key)
                .map(|kwh| kwh * 1000.0)
                .unwrap_or(0.0);
            let consumption_w = inputs
                .consumption_w_by_hour
                .get(&hour_key)
                .copied()
                .unwrap_or(flat_watts);
            let net_w = solar_w - consumption_w;

            let buy = price_slot.price + grid.transfer_import_kwh + grid.energy_tax_kwh;
            let sell = if grid.sell_enabled {
                price_slot.price * grid.sell_price_factor - grid.transfer_export_kwh
            } else {
                0.0
            };
            let avoidable_wh = (-net_w).max(0.0).min(battery.max_discharge_w) * SLOT_HOURS;

            WorkSlot {
                ts: price_slot.slot_ts.clone(),
                price: price_slot.price,
                buy,
                sell,
                solar_w,
                consumption_w,
                net_w,
                avoidable_wh,
                action: SlotAction::Idle,
                target_w: 0.0,
                soc_start_pct: 0.0,
                soc_end_pct: 0.0,
            }
        })
        .collect()
}

/// Step 3: a pair is only worth taking if its spread covers the energy lost
/// to the round trip at the average buy price.
fn minimum_spread(battery: &BatteryConfig, slots: &[WorkSlot]) -> f64 {
    if slots.is_empty() {
        return 0.0;
    }
    let avg_buy = slots.iter().map(|s| s.buy).sum::<f64>() / slots.len() as f64;
    avg_buy * (1.0 / battery.efficiency - 1.0)
}

/// Step 4–5: greedy pairing of cheap-charge and dear-discharge slots.
fn pair_greedy(battery: &BatteryConfig, min_spread: f64, slots: &mut [WorkSlot]) -> usize {
    let mut discharge_order: Vec<usize> =
        (0..slots.len()).filter(|&i| slots[i].avoidable_wh > 0.0).collect();
    discharge_order.sort_by(|&a, &b| {
        slots[b].buy.partial_cmp(&slots[a].buy).unwrap_or(std::cmp::Ordering::Equal)
    });

    // Never buy grid power into the battery while solar is already covering
    // the house: only deficit slots qualify as charge candidates.
    let mut charge_order: Vec<usize> =
        (0..slots.len()).filter(|&i| slots[i].net_w <= 0.0).collect();
    charge_order.sort_by(|&a, &b| {
        slots[a].buy.partial_cmp(&slots[b].buy).unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut remaining_wh = battery.max_soc_wh() - battery.min_soc_wh();
    let mut pairs = 0usize;
    let mut ci = 0usize;
    let mut di = 0usize;

    while ci < charge_order.len() && di < discharge_order.len() {
        let charge_idx = charge_order[ci];
        let discharge_idx = discharge_order[di];

        // A slot already claimed by an earlier pair is out of play.
        if slots[charge_idx].action != SlotAction::Idle {
            ci += 1;
            continue;
        }
        if slots[discharge_idx].action != SlotAction::Idle {
            di += 1;
            continue;
        }
        // Charging and discharging in the same quarter hour is meaningless.
        if charge_idx == discharge_idx {
            ci += 1;
            continue;
        }

        let spread = slots[discharge_idx].buy - slots[charge_idx].buy;
        if spread <= min_spread {
            break;
        }

        let discharge_wh = slots[discharge_idx]
            .avoidable_wh
            .min(battery.max_discharge_w * SLOT_HOURS)
            .min(remaining_wh);
        let charge_wh =
            (discharge_wh / battery.efficiency).min(battery.max_charge_w * SLOT_HOURS);
        if charge_wh <= 0.0 {
            break;
        }

        slots[charge_idx].action = SlotAction::ChargeGrid;
        slots[charge_idx].target_w = charge_wh / SLOT_HOURS;
        slots[discharge_idx].action = SlotAction::Discharge;
        slots[discharge_idx].target_w = discharge_wh / SLOT_HOURS;

        remaining_wh -= charge_wh;
        pairs += 1;
        ci += 1;
        di += 1;
    }
    pairs
}

/// Leftover surplus slots soak up their own solar.
fn assign_solar_charge(battery: &BatteryConfig, slots: &mut [WorkSlot]) {
    for slot in slots.iter_mut() {
        if slot.action == SlotAction::Idle && slot.net_w > 0.0 {
            slot.action = SlotAction::ChargeSolar;
            slot.target_w = slot.net_w.min(battery.max_charge_w);
        }
    }
}

/// Step 6: walk the window chronologically, clipping every action to the SOC
/// envelope and recording the SOC trajectory. Actions that cannot move any
/// energy degrade to idle (or to sell for a full battery on surplus).
fn forward_soc_pass(
    battery: &BatteryConfig,
    grid: &GridConfig,
    start_soc_pct: Option<f64>,
    slots: &mut [WorkSlot],
) {
    let capacity_wh = battery.capacity_wh();
    let min_wh = battery.min_soc_wh();
    let max_wh = battery.max_soc_wh();

    let mut soc_wh = match start_soc_pct {
        Some(pct) => (pct / 100.0 * capacity_wh).clamp(min_wh, max_wh),
        None => min_wh,
    };

    // The trajectory is recorded separately so the schedule rows can carry
    // rounded percentages without feeding rounding error forward.
    let mut trajectory = Vec::with_capacity(slots.len());

    for slot in slots.iter_mut() {
        let soc_start = soc_wh;
        match slot.action {
            SlotAction::ChargeGrid => {
                let stored = (slot.target_w * SLOT_HOURS * battery.efficiency)
                    .min(max_wh - soc_wh)
                    .max(0.0);
                if stored <= 0.0 {
                    slot.action = SlotAction::Idle;
                    slot.target_w = 0.0;
                } else {
                    soc_wh += stored;
                    // Report the grid draw needed to deposit that much.
                    slot.target_w = stored / (SLOT_HOURS * battery.efficiency);
                }
            }
            SlotAction::ChargeSolar => {
                let stored = (slot.target_w * SLOT_HOURS).min(max_wh - soc_wh).max(0.0);
                if stored <= 0.0 {
                    if grid.sell_enabled && slot.sell > 0.0 && slot.net_w > 0.0 {
                        slot.action = SlotAction::Sell;
                        slot.target_w = slot.net_w.min(battery.max_discharge_w);
                    } else {
                        slot.action = SlotAction::Idle;
                        slot.target_w = 0.0;
                    }
                } else {
                    soc_wh += stored;
                    slot.target_w = stored / SLOT_HOURS;
                }
            }
            SlotAction::Discharge | SlotAction::Sell => {
                let drawn = (slot.target_w * SLOT_HOURS).min(soc_wh - min_wh).max(0.0);
                if drawn <= 0.0 {
                    slot.action = SlotAction::Idle;
                    slot.target_w = 0.0;
                } else {
                    soc_wh -= drawn;
                    slot.target_w = drawn / SLOT_HOURS;
                }
            }
            SlotAction::Idle => {}
        }
        trajectory.push((soc_start, soc_wh));
    }

    // Percentages, one decimal.
    for (slot, (start, end)) in slots.iter_mut().zip(trajectory) {
        slot.soc_start_pct = round1(start / capacity_wh * 100.0);
        slot.soc_end_pct = round1(end / capacity_wh * 100.0);
    }
}

/// Step 7: what the window costs with and without the plan, from post-pass
/// watts only.
fn summarize(min_spread: f64, pairs: usize, slots: &[WorkSlot]) -> PlanSummary {
    let mut without = 0.0;
    let mut with = 0.0;

    for slot in slots {
        let deficit_kwh = ((slot.consumption_w - slot.solar_w).max(0.0)) * SLOT_HOURS / 1000.0;
        without += deficit_kwh * slot.buy;

        let moved_kwh = slot.target_w * SLOT_HOURS / 1000.0;
        match slot.action {
            SlotAction::Discharge => {
                with += (deficit_kwh - moved_kwh).max(0.0) * slot.buy;
            }
            SlotAction::ChargeGrid => {
                with += deficit_kwh * slot.buy + moved_kwh * slot.buy;
            }
            SlotAction::Sell => {
                with += deficit_kwh * slot.buy - moved_kwh * slot.sell;
            }
            SlotAction::ChargeSolar | SlotAction::Idle => {
                with += deficit_kwh * slot.buy;
            }
        }
    }

    PlanSummary {
        cost_without_battery: without,
        cost_with_battery: with,
        savings: without - with,
        pairs,
        min_spread,
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn battery() -> BatteryConfig {
        BatteryConfig {
            capacity_kwh: 10.0,
            max_charge_w: 5000.0,
            max_discharge_w: 5000.0,
            efficiency: 0.9,
            min_soc: 10.0,
            max_soc: 90.0,
        }
    }

    fn grid() -> GridConfig {
        GridConfig {
            sell_enabled: false,
            sell_price_factor: 0.9,
            transfer_import_kwh: 0.0,
            transfer_export_kwh: 0.0,
            energy_tax_kwh: 0.0,
        }
    }

    fn price(ts: &str, price: f64) -> PriceSlot {
        PriceSlot { slot_ts: ts.to_string(), price, region: "FI".to_string() }
    }

    #[test]
    fn minimum_spread_reflects_round_trip_loss() {
        let inputs = PlanInputs {
            prices: vec![price("2025-06-01T00:00", 0.3), price("2025-06-01T00:15", 0.5)],
            solar_kwh_by_hour: HashMap::new(),
            consumption_w_by_hour: HashMap::new(),
            start_soc_pct: None,
        };
        let slots = build_slots(&battery(), &grid(), 400.0, &inputs);
        let spread = minimum_spread(&battery(), &slots);
        // avg buy 0.4, efficiency 0.9: 0.4 * (1/0.9 - 1)
        assert!((spread - 0.4 * (1.0 / 0.9 - 1.0)).abs() < 1e-12);
    }

    #[test]
    fn missing_hourly_inputs_default_to_flat_and_zero() {
        let inputs = PlanInputs {
            prices: vec![price("2025-06-01T00:00", 0.3)],
            solar_kwh_by_hour: HashMap::new(),
            consumption_w_by_hour: HashMap::new(),
            start_soc_pct: None,
        };
        let slots = build_slots(&battery(), &grid(), 350.0, &inputs);
        assert_eq!(slots[0].solar_w, 0.0);
        assert_eq!(slots[0].consumption_w, 350.0);
        assert_eq!(slots[0].net_w, -350.0);
        assert!((slots[0].avoidable_wh - 350.0 * 0.25).abs() < 1e-9);
    }

    #[test]
    fn hourly_inputs_interpolate_onto_quarters() {
        let mut solar = HashMap::new();
        solar.insert("2025-06-01T12:00".to_string(), 3.0);
        let mut cons = HashMap::new();
        cons.insert("2025-06-01T12:00".to_string(), 500.0);
        let inputs = PlanInputs {
            prices: vec![price("2025-06-01T12:15", 0.1), price("2025-06-01T12:30", 0.1)],
            solar_kwh_by_hour: solar,
            consumption_w_by_hour: cons,
            start_soc_pct: None,
        };
        let slots = build_slots(&battery(), &grid(), 400.0, &inputs);
        for slot in &slots {
            assert_eq!(slot.solar_w, 3000.0);
            assert_eq!(slot.consumption_w, 500.0);
            assert_eq!(slot.net_w, 2500.0);
            assert_eq!(slot.avoidable_wh, 0.0);
        }
    }

    #[test]
    fn sell_price_is_zero_when_selling_is_disabled() {
        let inputs = PlanInputs {
            prices: vec![price("2025-06-01T00:00", 0.5)],
            solar_kwh_by_hour: HashMap::new(),
            consumption_w_by_hour: HashMap::new(),
            start_soc_pct: None,
        };
        let slots = build_slots(&battery(), &grid(), 400.0, &inputs);
        assert_eq!(slots[0].sell, 0.0);

        let mut selling = grid();
        selling.sell_enabled = true;
        selling.transfer_export_kwh = 0.01;
        let slots = build_slots(&battery(), &selling, 400.0, &inputs);
        assert!((slots[0].sell - (0.5 * 0.9 - 0.01)).abs() < 1e-12);
    }
}
