mod consumer_flow;
mod journal_restore;
