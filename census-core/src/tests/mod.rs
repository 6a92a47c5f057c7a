//! Behavioural coverage for the census core.

use super::*;

mod finalize_steps;
mod helpers;
