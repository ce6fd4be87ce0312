use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

use clap::{Arg, ArgAction, Command};
use tracing::{debug, warn};

use mpw::marshal::{self, Format};
use mpw::secret::SecretString;
use mpw::types::{
    AlgorithmVersion, Purpose, ResultClass, ResultType, COUNTER_DEFAULT, COUNTER_TIME_BASED,
};
use mpw::{algorithm, identicon, Error};

const EX_USAGE: i32 = 64;
const EX_DATAERR: i32 = 65;
const EX_SOFTWARE: i32 = 70;

const ENV_FULL_NAME: &str = "MP_FULLNAME";
const ENV_ALGORITHM: &str = "MP_ALGORITHM";
const ENV_FORMAT: &str = "MP_FORMAT";

static TYPE_HELP: &str = "\
The result's template (defaults to 'long' for -p a, 'name' for -p i, 'phrase' for -p r)

x, max, maximum   20 characters, contains symbols.
l, long           Copy-friendly, 14 characters, contains symbols.
m, med, medium    Copy-friendly, 8 characters, contains symbols.
b, basic          8 characters, no symbols.
s, short          Copy-friendly, 4 characters, no symbols.
i, pin            4 numbers.
n, name           9 letter name.
p, phrase         20 character sentence.
K, key            Encryption key; set the key size in bits with -s.
P, personal       Saved personal password; save with -s.
D, device         Saved device-private password; save with -s.";

static PURPOSE_HELP: &str = "\
The purpose of the generated token (defaults to 'auth')

a, auth           An authentication token such as a password.
i, ident          An identification token such as a login name.
r, rec            A recovery token such as a security answer.";

static FORMAT_HELP: &str = "\
The sites format to use for reading and writing site parameters

n, none           No file.
f, flat           ~/.mpw.d/<full name>.mpsites
j, json           ~/.mpw.d/<full name>.mpsites.json";

fn main() {
    process::exit(run());
}

fn getenv(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn getline(prompt: &str) -> Option<String> {
    eprint!("{prompt} ");
    let _ = io::stderr().flush();
    let mut buf = String::new();
    match io::stdin().read_line(&mut buf) {
        Ok(n) if n > 0 => {
            let line = buf.trim_end_matches(['\r', '\n']).to_owned();
            if line.is_empty() {
                None
            } else {
                Some(line)
            }
        }
        _ => None,
    }
}

fn getpass(prompt: &str) -> SecretString {
    loop {
        match rpassword::prompt_password(prompt) {
            Ok(password) if !password.is_empty() => return SecretString::new(password),
            Ok(_) => continue,
            Err(err) => {
                eprintln!("Couldn't read master password: {err}");
                process::exit(EX_DATAERR);
            }
        }
    }
}

fn sites_path(full_name: &str, extension: &str) -> Option<PathBuf> {
    let home = env::var_os("HOME")?;
    let mut path = PathBuf::from(home);
    path.push(".mpw.d");
    path.push(format!("{full_name}.{extension}"));
    Some(path)
}

fn run() -> i32 {
    let matches = Command::new("Master Password")
        .about("A stateless password management solution.")
        .arg(
            Arg::new("full-name")
                .short('u')
                .value_name("full-name")
                .help(format!(
                    "The full name of the user; checks the master password against the \
                     stored key ID. Defaults to {ENV_FULL_NAME} in env or prompts."
                )),
        )
        .arg(
            Arg::new("full-name-update")
                .short('U')
                .value_name("full-name")
                .conflicts_with("full-name")
                .help("Like -u, but allows updating to a new master password"),
        )
        .arg(
            Arg::new("master-password")
                .short('M')
                .value_name("password")
                .help("The master password; insecure, for testing purposes only"),
        )
        .arg(Arg::new("type").short('t').value_name("type").help(TYPE_HELP))
        .arg(
            Arg::new("counter")
                .short('c')
                .value_name("counter")
                .help("The value of the site counter (defaults to 1)"),
        )
        .arg(
            Arg::new("algorithm")
                .short('a')
                .value_name("version")
                .help(format!(
                    "The algorithm version to use, {} - {}. Defaults to {ENV_ALGORITHM} in env or {}.",
                    AlgorithmVersion::FIRST,
                    AlgorithmVersion::LAST,
                    AlgorithmVersion::CURRENT
                )),
        )
        .arg(
            Arg::new("param")
                .short('s')
                .value_name("value")
                .help("The value to save for -t P or -t D, or the key size in bits for -t K"),
        )
        .arg(Arg::new("purpose").short('p').value_name("purpose").help(PURPOSE_HELP))
        .arg(
            Arg::new("context")
                .short('C')
                .value_name("context")
                .help("Empty for a universal site, or the most significant word of the security question"),
        )
        .arg(
            Arg::new("format")
                .short('f')
                .value_name("format")
                .help(format!(
                    "{FORMAT_HELP}\nAllows fallback from json to flat; defaults to {ENV_FORMAT} in env or json."
                )),
        )
        .arg(
            Arg::new("format-fixed")
                .short('F')
                .value_name("format")
                .conflicts_with("format")
                .help("Like -f, but forces the use of the given format"),
        )
        .arg(
            Arg::new("redacted")
                .short('R')
                .value_name("0|1")
                .help("Whether to save the sites in redacted format (defaults to 1)"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .action(ArgAction::Count)
                .help("Increase output verbosity"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .action(ArgAction::Count)
                .help("Decrease output verbosity"),
        )
        .arg(Arg::new("site-name").value_name("site-name"))
        .get_matches();

    let verbosity =
        i16::from(matches.get_count("verbose")) - i16::from(matches.get_count("quiet"));
    let level = match verbosity {
        i16::MIN..=-2 => tracing::Level::ERROR,
        -1 => tracing::Level::WARN,
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(io::stderr)
        .with_target(false)
        .without_time()
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    // Determine the full name, site name and master password, prompting
    // for whatever is still missing.
    let mut allow_password_update = false;
    let full_name_arg = match matches.get_one::<String>("full-name-update") {
        Some(name) => {
            allow_password_update = true;
            Some(name.clone())
        }
        None => matches.get_one::<String>("full-name").cloned(),
    };
    let Some(mut full_name) = full_name_arg
        .or_else(|| getenv(ENV_FULL_NAME))
        .or_else(|| getline("Your full name:"))
    else {
        eprintln!("Missing full name.");
        return EX_DATAERR;
    };
    let Some(site_name) = matches
        .get_one::<String>("site-name")
        .cloned()
        .or_else(|| getline("Site name:"))
    else {
        eprintln!("Missing site name.");
        return EX_DATAERR;
    };
    let master_password = match matches.get_one::<String>("master-password") {
        Some(password) if !password.is_empty() => SecretString::from(password.as_str()),
        _ => getpass("Your master password: "),
    };

    let (format_arg, format_fixed) = match matches.get_one::<String>("format-fixed") {
        Some(format) => (Some(format.clone()), true),
        None => (matches.get_one::<String>("format").cloned(), false),
    };
    let format_arg = format_arg.or_else(|| getenv(ENV_FORMAT));
    let format_given = format_arg.is_some();
    let sites_format = match format_arg.as_deref() {
        None => Some(Format::Json),
        Some("n") | Some("none") => None,
        Some(name) => match Format::from_name(name) {
            Some(format) => Some(format),
            None => {
                eprintln!("Invalid sites format: {name}");
                return EX_USAGE;
            }
        },
    };

    // Find and read the user's sites file, falling back from the
    // structured to the flat extension when allowed.
    let mut user: Option<marshal::User> = None;
    let mut used_format = sites_format;
    if let Some(format) = sites_format {
        let mut path = sites_path(&full_name, format.extension());
        let mut data = path.as_ref().and_then(|p| fs::read(p).ok());
        if data.is_none() && !format_fixed && format == Format::Json {
            path = sites_path(&full_name, Format::Flat.extension());
            data = path.as_ref().and_then(|p| fs::read(p).ok());
            if data.is_some() {
                used_format = Some(Format::Flat);
            }
        }

        if let Some(data) = data {
            // Honor an explicit format flag; sniff otherwise.
            let read_format = if format_given { used_format } else { None };
            match marshal::read_user(&data, read_format, &master_password) {
                Ok(read) => user = Some(read),
                Err(Error::WrongMasterPassword(desc)) => {
                    if !allow_password_update {
                        eprintln!("Incorrect master password according to configuration: {desc}");
                        return EX_DATAERR;
                    }
                    eprintln!("Given master password does not match configuration.");
                    eprintln!(
                        "To update the configuration with this new master password, \
                         first confirm the old master password."
                    );
                    loop {
                        let old_password = getpass("Old master password: ");
                        match marshal::read_user(&data, read_format, &old_password) {
                            Ok(mut read) => {
                                if let Err(err) = read.update_master_password(&master_password) {
                                    eprintln!("Couldn't update master password: {err}");
                                    return EX_SOFTWARE;
                                }
                                user = Some(read);
                                break;
                            }
                            Err(Error::WrongMasterPassword(_)) => continue,
                            Err(err) => {
                                warn!("Couldn't parse configuration file: {err}");
                                break;
                            }
                        }
                    }
                }
                Err(err) => warn!("Couldn't parse configuration file: {err}"),
            }
        } else {
            debug!("No configuration file for {full_name}.");
        }
    }

    // Load defaults from the configuration.
    let mut algorithm_version = AlgorithmVersion::CURRENT;
    let mut result_type = ResultType::TemplateLong;
    let mut site_counter = COUNTER_DEFAULT;
    let mut file_redacted = true;
    let mut save_redacted = true;
    let mut site_exists = false;
    let mut stored_login: Option<String> = None;
    let mut stored_login_generated = false;
    let mut stored_content: Option<String> = None;
    let mut site_url: Option<String> = None;
    if let Some(user) = &user {
        full_name = user.full_name.clone();
        algorithm_version = user.algorithm;
        result_type = user.default_type;
        file_redacted = user.redacted;
        save_redacted = user.redacted;
        if !user.redacted {
            warn!("Sites configuration is not redacted. Use -R 1 to change this.");
        }
        if let Some(site) = user.find_site(&site_name) {
            site_exists = true;
            result_type = site.result_type;
            site_counter = site.counter;
            algorithm_version = site.algorithm.unwrap_or(user.algorithm);
            stored_login = site.login_name.clone();
            stored_login_generated = site.login_generated;
            stored_content = site.content.clone();
            site_url = site.url.clone();
        }
    }

    // Apply config-overriding command-line parameters.
    if let Some(arg) = matches.get_one::<String>("redacted") {
        save_redacted = arg == "1";
    }
    if let Some(arg) = matches.get_one::<String>("counter") {
        match arg.parse::<u32>() {
            Ok(counter) if counter != COUNTER_TIME_BASED => site_counter = counter,
            _ => {
                eprintln!("Invalid site counter: {arg}");
                return EX_USAGE;
            }
        }
    }
    if let Some(arg) = matches
        .get_one::<String>("algorithm")
        .cloned()
        .or_else(|| getenv(ENV_ALGORITHM))
    {
        match arg.parse::<u32>().ok().and_then(|v| AlgorithmVersion::from_u32(v).ok()) {
            Some(version) => algorithm_version = version,
            None => {
                eprintln!("Invalid algorithm version: {arg}");
                return EX_USAGE;
            }
        }
    }
    let key_purpose = match matches.get_one::<String>("purpose") {
        None => Purpose::Authentication,
        Some(arg) => match Purpose::from_name(arg) {
            Some(purpose) => purpose,
            None => {
                eprintln!("Invalid purpose: {arg}");
                return EX_USAGE;
            }
        },
    };
    let purpose_word = match key_purpose {
        Purpose::Authentication => "password",
        Purpose::Identification => "login",
        Purpose::Recovery => "answer",
    };
    if key_purpose != Purpose::Authentication {
        result_type = ResultType::default_for(key_purpose);
    }
    if let Some(arg) = matches.get_one::<String>("type") {
        match ResultType::from_name(arg) {
            Some(ty) => result_type = ty,
            None => {
                eprintln!("Invalid type: {arg}");
                return EX_USAGE;
            }
        }
    }
    let result_param = matches.get_one::<String>("param").cloned();
    let key_context = matches.get_one::<String>("context").cloned();

    // Operation summary.
    let identicon = identicon::identicon(&full_name, &master_password);
    if identicon.is_none() {
        warn!("Couldn't determine identicon.");
    }
    debug!("-----------------");
    debug!("fullName         : {full_name}");
    debug!("siteName         : {site_name}");
    debug!("siteCounter      : {site_counter}");
    debug!("resultType       : {result_type} ({})", result_type.code());
    debug!("keyPurpose       : {}", key_purpose.name());
    debug!("keyContext       : {}", key_context.as_deref().unwrap_or("-"));
    debug!("algorithmVersion : {algorithm_version}");
    debug!("-----------------");
    eprint!(
        "{full_name}'s {purpose_word} for {site_name}:\n[ {} ]: ",
        identicon.map_or_else(String::new, |i| i.ansi())
    );
    let _ = io::stderr().flush();

    // Determine the master key.
    let master_key = match &user {
        Some(user) => user.master_key_for(algorithm_version),
        None => algorithm::master_key(&full_name, &master_password, algorithm_version),
    };
    let master_key = match master_key {
        Ok(key) => key,
        Err(err) => {
            eprintln!("Couldn't derive master key: {err}");
            return EX_SOFTWARE;
        }
    };

    // Output the result.
    let mut save_state: Option<SecretString> = None;
    if key_purpose == Purpose::Identification && !stored_login_generated && stored_login.is_some()
    {
        println!("{}", stored_login.as_deref().unwrap_or_default());
    } else if result_type.class() == ResultClass::Stateful && result_param.is_some() && site_exists
    {
        save_state = result_param.as_deref().map(SecretString::from);
        eprintln!("saved.");
    } else {
        let mut already_final: Option<String> = None;
        let param = if result_type.class() == ResultClass::Stateful {
            if result_param.is_some() {
                // No site on file to save to; treat the value as state.
                result_param.clone()
            } else {
                match &stored_content {
                    Some(content) if !file_redacted => {
                        // Visible configurations hold the plaintext itself.
                        already_final = Some(content.clone());
                        None
                    }
                    Some(content) => Some(content.clone()),
                    None => {
                        eprintln!("No saved content for this site; save it with -s.");
                        return EX_DATAERR;
                    }
                }
            }
        } else {
            result_param.clone()
        };

        if let Some(text) = already_final {
            println!("{text}");
        } else {
            let result = algorithm::site_result(
                &master_key,
                &site_name,
                site_counter,
                key_purpose,
                key_context.as_deref(),
                result_type,
                param.as_deref(),
                algorithm_version,
            );
            match result {
                Ok(result) => println!("{}", result.as_str()),
                Err(err) => {
                    eprintln!("Couldn't generate site result: {err}");
                    return EX_SOFTWARE;
                }
            }
        }
    }
    if let Some(url) = &site_url {
        eprintln!("See: {url}");
    }

    // Update the sites file.
    if let Some(mut user) = user {
        let now = chrono::Utc::now().timestamp();
        let user_algorithm = user.algorithm;

        // Any use of a site on file is recorded, no matter which of the
        // purpose branches below applies to it.
        let mut touched_site = site_exists;
        if key_purpose == Purpose::Authentication && !result_type.alternative() {
            let site_algorithm = Some(algorithm_version).filter(|&v| v != user_algorithm);
            let site = match user.sites.iter().position(|s| s.name == site_name) {
                Some(i) => &mut user.sites[i],
                None => user.add_site(&site_name, result_type, site_counter, site_algorithm),
            };
            site.result_type = result_type;
            site.counter = site_counter;
            site.algorithm = site_algorithm;
            touched_site = true;
        } else if key_purpose == Purpose::Identification && site_exists {
            // The result type of a generated login is not persisted.
            if result_type.class() == ResultClass::Template {
                if let Some(site) = user.find_site_mut(&site_name) {
                    site.login_generated = true;
                }
            }
        } else if key_purpose == Purpose::Recovery && site_exists {
            // Nor is the result type of a recovery answer.
            if let (Some(context), Some(site)) =
                (key_context.as_deref(), user.find_site_mut(&site_name))
            {
                site.ensure_question(context);
            }
        }

        if let Err(err) = user.set_redacted(save_redacted) {
            warn!("Couldn't re-encode site contents: {err}");
        }

        let new_content = match &save_state {
            None => None,
            Some(state) if save_redacted => {
                match algorithm::site_state(
                    &master_key,
                    &site_name,
                    site_counter,
                    key_purpose,
                    key_context.as_deref(),
                    result_type,
                    state,
                    algorithm_version,
                ) {
                    Ok(state) => Some(state),
                    Err(err) => {
                        eprintln!("Couldn't encrypt site content: {err}");
                        return EX_SOFTWARE;
                    }
                }
            }
            Some(state) => Some(state.as_str().to_owned()),
        };
        if let Some(site) = user.find_site_mut(&site_name) {
            if let Some(content) = new_content {
                site.content = Some(content);
            }
            if touched_site {
                site.last_used = now;
                site.uses += 1;
            }
        }
        if touched_site {
            user.last_used = now;
        }

        let out_format = if format_fixed {
            used_format.unwrap_or(Format::Json)
        } else {
            Format::Json
        };
        match sites_path(&user.full_name, out_format.extension()) {
            None => warn!("Couldn't determine the sites directory."),
            Some(path) => {
                debug!("Updating: {} ({})", path.display(), out_format.name());
                match marshal::write_user(&user, out_format) {
                    Err(err) => warn!("Couldn't encode updated configuration: {err}"),
                    Ok(text) => {
                        if let Some(parent) = path.parent() {
                            let _ = fs::create_dir_all(parent);
                        }
                        if let Err(err) = fs::write(&path, text) {
                            warn!(
                                "Couldn't write updated configuration file {}: {err}",
                                path.display()
                            );
                        }
                    }
                }
            }
        }
    }

    0
}
