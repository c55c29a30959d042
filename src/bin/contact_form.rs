#![cfg(not(tarpaulin_include))]

use std::env;
use std::io::{self, Write};

use contact_relay::submission::is_valid_email;
use contact_relay::{Relay, RelayError, SettingsStore, Submission, init_logging};

const HELP: &str = "\
Commands:
  submit                  fill in and send the contact form
  show                    print the current settings
  set destination <url>   spreadsheet script URL
  set proxy <url>         proxy relay server URL
  set use-proxy on|off    route submissions through the proxy first
  test                    check that the destination answers
  help                    this text
  q                       quit";

/// Read one line from stdin, `None` on end of input
fn prompt(label: &str) -> io::Result<Option<String>> {
    print!("{label}: ");
    io::stdout().flush()?;

    let mut line = String::new();
    if io::stdin().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

/// Ask until a required field has a value
fn required(label: &str) -> io::Result<Option<String>> {
    loop {
        match prompt(&format!("{label} *"))? {
            None => return Ok(None),
            Some(value) if value.is_empty() => println!("  {label} is required"),
            Some(value) => return Ok(Some(value)),
        }
    }
}

/// Collect the form fields; `None` if input ended half way
fn fill_form() -> io::Result<Option<Submission>> {
    let Some(name) = required("Name")? else {
        return Ok(None);
    };

    let email = loop {
        let Some(email) = required("Email")? else {
            return Ok(None);
        };
        if is_valid_email(&email) {
            break email;
        }
        println!("  Please enter a valid email address");
    };

    let Some(phone) = prompt("Phone")? else {
        return Ok(None);
    };
    let Some(company) = prompt("Company")? else {
        return Ok(None);
    };
    let Some(message) = required("Message")? else {
        return Ok(None);
    };

    Ok(Some(
        Submission::new(&name, &email, &message)
            .with_phone(&phone)
            .with_company(&company)
            .stamped(),
    ))
}

async fn submit(relay: &Relay, store: &SettingsStore) -> io::Result<()> {
    let Some(submission) = fill_form()? else {
        return Ok(());
    };

    // settings are re-read for every attempt
    let settings = match SettingsStore::open(store.path()) {
        Ok(fresh) => fresh.settings(),
        Err(e) => {
            eprintln!("Could not read settings: {e}");
            return Ok(());
        }
    };

    match relay.submit(&settings, &submission).await {
        Ok(delivery) if delivery.is_confirmed() => {
            println!("Thank you! Your message has been sent (via {}).", delivery.transport);
            println!("Form cleared.");
        }
        Ok(delivery) => {
            println!(
                "Your message was sent via {}, but the destination's answer could not be read.",
                delivery.transport
            );
            println!("Form cleared.");
        }
        Err(RelayError::NotConfigured) => {
            println!("No destination configured. Use `set destination <url>` first.");
        }
        Err(RelayError::Validation(e)) => println!("{e}"),
        Err(e) => {
            log::error!("Form submission error: {e}");
            println!("Sorry, something went wrong. Please try again.");
        }
    }

    Ok(())
}

fn show(store: &SettingsStore) {
    let settings = store.settings();
    println!("Settings file: {}", store.path().display());
    println!(
        "  destination: {}",
        settings.destination_url.as_deref().unwrap_or("(not set)")
    );
    println!(
        "  proxy:       {}",
        settings.proxy_url.as_deref().unwrap_or("(not set)")
    );
    println!("  use proxy:   {}", settings.use_proxy);
}

fn set(store: &mut SettingsStore, args: &[&str]) -> Result<(), String> {
    let mut settings = store.settings();

    match args {
        ["destination", url] => settings.destination_url = Some(url.to_string()),
        ["proxy", url] => settings.proxy_url = Some(url.to_string()),
        ["use-proxy", "on"] => settings.use_proxy = true,
        ["use-proxy", "off"] => settings.use_proxy = false,
        _ => return Err("usage: set destination|proxy <url> | set use-proxy on|off".to_string()),
    }

    store.put_settings(&settings);
    store.save().map_err(|e| e.to_string())
}

async fn test(relay: &Relay, store: &SettingsStore) {
    println!("Testing connection...");
    match relay.test_connection(&store.settings()).await {
        Ok(report) if report.success => {
            println!("Connection OK ({} {})", report.status, report.status_text);
            println!("  {}", report.data);
        }
        Ok(report) => println!(
            "Destination answered {} {}",
            report.status, report.status_text
        ),
        Err(RelayError::NotConfigured) => println!("No destination configured."),
        Err(e) => println!("Connection failed: {e}"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let path = env::var("CONTACT_FORM_SETTINGS").unwrap_or_else(|_| "contact-form.json".to_string());
    let mut store = SettingsStore::open(&path)?;
    let relay = Relay::default();

    println!("Contact form. Type `help` for commands.");
    if store.settings().destination().is_none() {
        println!("No destination configured yet: `set destination <url>`.");
    }

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut command = String::new();
        if io::stdin().read_line(&mut command)? == 0 {
            break;
        }
        let words: Vec<&str> = command.split_whitespace().collect();

        match words.as_slice() {
            [] => continue,
            ["q"] | ["quit"] => break,
            ["help"] => println!("{HELP}"),
            ["show"] => show(&store),
            ["submit"] => submit(&relay, &store).await?,
            ["test"] => test(&relay, &store).await,
            ["set", args @ ..] => match set(&mut store, args) {
                Ok(()) => println!("Saved."),
                Err(e) => println!("{e}"),
            },
            _ => println!("Unknown command. Type `help`."),
        }
    }

    Ok(())
}
