mod concurrent_deaths;
mod flaky_engine;
mod idempotent_death;
mod last_node;
mod non_ha_loss;
mod slow_engine;
mod three_node;
