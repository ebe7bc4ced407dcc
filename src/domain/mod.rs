pub mod schedule;
pub mod types;

pub use schedule::{ScheduleSlot, SlotAction};
pub use types::{
    ConsumptionReading, ConsumptionSource, EnergySnapshot, MatrixCell, PipelineRun, PipelineStatus,
    PriceSlot, SmoothedCell, SolarReading,
};
