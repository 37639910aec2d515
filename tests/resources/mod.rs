mod monitor_signals;
