pub mod osc_listener;
