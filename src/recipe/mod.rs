//! Preparation planning
//!
//! - [`scaling`] - Stretch a recipe to a glass size and alcohol factor
//! - [`planner`] - Validate against the mounted bottles and build the plan
//!
//! ```ignore
//! let scaled = scale(&recipe, ScaleParams::new(250.0, 1.0));
//! let plan = Planner::new(config.pumps.clone(), config.engine.plan_policy())
//!     .validate(&scaled, &bottles)?;
//! println!("{} phases, {:.1} s", plan.phases.len(), plan.total_duration());
//! ```

pub mod planner;
pub mod scaling;

pub use planner::{
    comment_text, possible_recipes, round_open_time, split_waves, HandAdd, Phase, PlanKind,
    PlanPolicy, Planner, PreparationPlan, PumpOp, Wave, FILL_LEVEL_TOLERANCE,
};
pub use scaling::{scale, ScaleParams, ScaledLine, ScaledRecipe};
