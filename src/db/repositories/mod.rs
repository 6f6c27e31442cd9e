mod settings_history;
