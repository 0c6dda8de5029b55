//! Behavioural scenarios for a `dockwatch` run.

mod run;
