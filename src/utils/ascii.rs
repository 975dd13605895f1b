pub fn print_startup_banner() {
    let year = chrono::Local::now().format("%Y").to_string();

    // ANSI color codes
    let red = "\x1B[38;5;196m";
    let gray = "\x1B[38;5;245m";
    let bright_red = "\x1B[91m";
    let reset = "\x1B[0m";

    println!(
        r#"
  {year} vidsync
   {red}
     .-----------------------.
     |  .-----------------.  |
     |  |      {reset}|\{red}         |  |   {gray}search, store,{red}
     |  |      {reset}| \{red}        |  |   {gray}serve the latest{red}
     |  |      {reset}| /{red}        |  |
     |  |      {reset}|/{red}         |  |
     |  '-----------------'  |
     '-----------------------'
            _|_______|_
         {bright_red}vidsync v{version}{reset}
"#,
        year = year,
        red = red,
        gray = gray,
        bright_red = bright_red,
        reset = reset,
        version = env!("CARGO_PKG_VERSION"),
    );
}
