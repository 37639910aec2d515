mod admission;
mod recovery_flows;
mod workflow_lifecycle;
