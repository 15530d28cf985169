mod resolve;
mod scenarios;
mod snapshot;
