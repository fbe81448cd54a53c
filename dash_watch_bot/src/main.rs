use arch_bot_commons::*;

fn main() {
    if std::env::var_os("RUST_LOG").is_none() {
        // Nothing else is running yet.
        unsafe { std::env::set_var("RUST_LOG", "WARN,dash_watch_bot=debug") };
    }
    start_everything(dash_watch_bot::entry());
}
