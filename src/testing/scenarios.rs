//! End-to-end scenarios: rings built through the distributor and read back
//! from published snapshots.
