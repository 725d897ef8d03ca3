//! Behavioural scenarios for retention pruning and policy assignment.

mod retention;
