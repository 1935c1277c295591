use std::fmt;

/// The first line of a request: `#! @<addressee> <language>`, followed by
/// the program body on later lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShebangCommand {
    pub addressee: String,
    pub language: String,
    pub body: String,
}

/// Why a request could not be turned into a [`ShebangCommand`].
///
/// `Display` renders the reply sent back to the requester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShebangError {
    MissingBody,
    InvalidShebang,
    /// Well-formed, but addressed to someone else.
    WrongInterpreter { addressee: String },
}

impl fmt::Display for ShebangError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShebangError::MissingBody => write!(f, "Error: Missing code after shebang."),
            ShebangError::InvalidShebang => write!(f, "Error: Invalid shebang."),
            ShebangError::WrongInterpreter { .. } => write!(f, "Error: Wrong interpreter."),
        }
    }
}

impl std::error::Error for ShebangError {}

/// Splits `text` into shebang fields and body. Does not check the addressee.
pub fn parse(text: &str) -> Result<ShebangCommand, ShebangError> {
    let (first_line, body) = text
        .trim()
        .split_once('\n')
        .ok_or(ShebangError::MissingBody)?;

    let tokens: Vec<&str> = first_line.split_whitespace().collect();
    let [_marker, addressee, language] = tokens.as_slice() else {
        return Err(ShebangError::InvalidShebang);
    };
    let language = language.strip_prefix('#').unwrap_or(*language);

    Ok(ShebangCommand {
        addressee: addressee.to_string(),
        language: language.to_string(),
        body: body.to_string(),
    })
}

/// Parses `text` and checks it is addressed to `@<bot_handle>`.
pub fn parse_for(text: &str, bot_handle: &str) -> Result<ShebangCommand, ShebangError> {
    let command = parse(text)?;
    if command.addressee != format!("@{bot_handle}") {
        return Err(ShebangError::WrongInterpreter {
            addressee: command.addressee,
        });
    }
    Ok(command)
}
