mod progress;
mod queue_processor;
