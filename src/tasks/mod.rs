mod subscriber_sweep;

pub use subscriber_sweep::SubscriberSweepTask;
