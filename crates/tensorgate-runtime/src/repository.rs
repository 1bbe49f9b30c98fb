//! Filesystem model repository: one directory per model holding a
//! `config.pbtxt` in protobuf text format plus the model artifact at
//! `{model}/1/saved_model.{ext}`. This module resolves a model name to
//! worker load parameters; watching the repository for changes is the
//! server's job.

use std::path::Path;

use tensorgate_core::{Error, ParameterMap, Result};

/// Platform string -> (worker name, artifact extension).
fn platform_worker(platform: &str) -> Result<(&'static str, &'static str)> {
    Ok(match platform {
        "tensorflow_graphdef" => ("tensorflow", ".pb"),
        "pytorch_torchscript" => ("torchscript", ".pt"),
        "onnx_onnxv1" => ("onnx", ".onnx"),
        "migraphx_mxr" => ("migraphx", ".mxr"),
        "vitis_xmodel" => ("xmodel", ".xmodel"),
        other => {
            return Err(Error::invalid_argument(format!("unknown platform: {other}")));
        }
    })
}

/// Names of the model directories under a repository root.
pub fn list_models(repository: &Path) -> Vec<String> {
    let mut models = Vec::new();
    let Ok(entries) = std::fs::read_dir(repository) else {
        return models;
    };
    for entry in entries.flatten() {
        if entry.path().is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                models.push(name.to_string());
            }
        }
    }
    models.sort();
    models
}

/// Resolve a model's `config.pbtxt` into worker load parameters: the
/// worker selected by the platform, the artifact path, and the config's
/// own parameter map merged on top.
pub fn parse_model(repository: &Path, model: &str) -> Result<ParameterMap> {
    let mut model_path = repository.join(model);
    let mut config_path = model_path.join("config.pbtxt");

    // some exporters create model/model/config.pbtxt; search one level down
    if !config_path.exists() && model_path.join(model).join("config.pbtxt").exists() {
        model_path = model_path.join(model);
        config_path = model_path.join("config.pbtxt");
    }

    if !config_path.exists() {
        return Err(Error::FileNotFound(format!(
            "config file {} could not be opened",
            config_path.display()
        )));
    }
    let text = std::fs::read_to_string(&config_path)
        .map_err(|err| Error::FileRead(format!("{}: {err}", config_path.display())))?;
    let config = parse_config(&text)
        .map_err(|err| Error::FileRead(format!("{}: {err}", config_path.display())))?;

    let (worker, extension) = platform_worker(&config.platform)?;
    let model_base = model_path.join("1").join("saved_model");

    let mut params = ParameterMap::new();
    if config.platform == "tensorflow_graphdef" {
        // the tensorflow worker wants square HWC images and a flat class
        // vector, described by the first input/output tensors
        for input in config.inputs.iter().take(1) {
            params.put("input_node", input.name.as_str());
            if let Some(first) = input.shape.first() {
                params.put("input_size", *first as i32);
            }
            if let Some(last) = input.shape.last() {
                params.put("image_channels", *last as i32);
            }
        }
        for output in config.outputs.iter().take(1) {
            params.put("output_node", output.name.as_str());
            if let Some(first) = output.shape.first() {
                params.put("output_classes", *first as i32);
            }
        }
    }
    params.put("worker", worker);
    params.put(
        "model",
        format!("{}{extension}", model_base.display()),
    );
    params.merge(&config.parameters);
    Ok(params)
}

#[derive(Debug, Default)]
pub struct ConfigTensor {
    pub name: String,
    pub shape: Vec<i64>,
}

#[derive(Debug, Default)]
pub struct ModelConfig {
    pub name: Option<String>,
    pub platform: String,
    pub inputs: Vec<ConfigTensor>,
    pub outputs: Vec<ConfigTensor>,
    pub parameters: ParameterMap,
}

// ---------------------------------------------------------------------------
// protobuf text format, the subset model configs use

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
    Colon,
    Comma,
    OpenBrace,
    CloseBrace,
    OpenBracket,
    CloseBracket,
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            '#' => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            ':' => {
                chars.next();
                tokens.push(Token::Colon);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '{' => {
                chars.next();
                tokens.push(Token::OpenBrace);
            }
            '}' => {
                chars.next();
                tokens.push(Token::CloseBrace);
            }
            '[' => {
                chars.next();
                tokens.push(Token::OpenBracket);
            }
            ']' => {
                chars.next();
                tokens.push(Token::CloseBracket);
            }
            '"' => {
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some('n') => value.push('\n'),
                            Some('t') => value.push('\t'),
                            Some(c) => value.push(c),
                            None => return Err(Error::FileRead("unterminated string".into())),
                        },
                        Some(c) => value.push(c),
                        None => return Err(Error::FileRead("unterminated string".into())),
                    }
                }
                tokens.push(Token::Str(value));
            }
            c if c.is_ascii_digit() || c == '-' || c == '+' => {
                let mut raw = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E') {
                        raw.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if raw.contains('.') || raw.contains('e') || raw.contains('E') {
                    let value = raw
                        .parse::<f64>()
                        .map_err(|_| Error::FileRead(format!("bad number: {raw}")))?;
                    tokens.push(Token::Float(value));
                } else {
                    let value = raw
                        .parse::<i64>()
                        .map_err(|_| Error::FileRead(format!("bad number: {raw}")))?;
                    tokens.push(Token::Int(value));
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => {
                return Err(Error::FileRead(format!("unexpected character: {other}")));
            }
        }
    }
    Ok(tokens)
}

#[derive(Debug, Clone)]
enum PbValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Message(Vec<(String, PbValue)>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Parse fields until `until` (or end of input for the top level).
    fn fields(&mut self, until: Option<Token>) -> Result<Vec<(String, PbValue)>> {
        let mut fields = Vec::new();
        loop {
            match self.peek() {
                None => {
                    if until.is_none() {
                        return Ok(fields);
                    }
                    return Err(Error::FileRead("unexpected end of config".into()));
                }
                Some(token) if Some(token) == until.as_ref() => {
                    self.next();
                    return Ok(fields);
                }
                Some(Token::Ident(_)) => {
                    let Some(Token::Ident(name)) = self.next() else {
                        unreachable!()
                    };
                    let has_colon = matches!(self.peek(), Some(Token::Colon));
                    if has_colon {
                        self.next();
                    }
                    match self.peek() {
                        Some(Token::OpenBracket) => {
                            self.next();
                            loop {
                                if matches!(self.peek(), Some(Token::CloseBracket)) {
                                    self.next();
                                    break;
                                }
                                let value = self.value()?;
                                fields.push((name.clone(), value));
                                if matches!(self.peek(), Some(Token::Comma)) {
                                    self.next();
                                }
                            }
                        }
                        _ => {
                            let value = self.value()?;
                            fields.push((name, value));
                        }
                    }
                }
                Some(other) => {
                    return Err(Error::FileRead(format!("unexpected token: {other:?}")));
                }
            }
        }
    }

    fn value(&mut self) -> Result<PbValue> {
        match self.next() {
            Some(Token::Str(s)) => Ok(PbValue::Str(s)),
            Some(Token::Int(i)) => Ok(PbValue::Int(i)),
            Some(Token::Float(f)) => Ok(PbValue::Float(f)),
            Some(Token::Ident(ident)) => match ident.as_str() {
                "true" => Ok(PbValue::Bool(true)),
                "false" => Ok(PbValue::Bool(false)),
                other => Ok(PbValue::Str(other.to_string())),
            },
            Some(Token::OpenBrace) => {
                let fields = self.fields(Some(Token::CloseBrace))?;
                Ok(PbValue::Message(fields))
            }
            other => Err(Error::FileRead(format!("unexpected token: {other:?}"))),
        }
    }
}

fn tensor_from_fields(fields: &[(String, PbValue)]) -> ConfigTensor {
    let mut tensor = ConfigTensor::default();
    for (name, value) in fields {
        match (name.as_str(), value) {
            ("name", PbValue::Str(s)) => tensor.name = s.clone(),
            ("shape", PbValue::Int(i)) => tensor.shape.push(*i),
            _ => {}
        }
    }
    tensor
}

fn parameter_from_fields(fields: &[(String, PbValue)], config: &mut ModelConfig) {
    let mut key = None;
    for (name, value) in fields {
        match (name.as_str(), value) {
            ("key", PbValue::Str(s)) => key = Some(s.clone()),
            ("value", PbValue::Message(inner)) => {
                let Some(key) = key.as_ref() else { continue };
                for (kind, value) in inner {
                    match (kind.as_str(), value) {
                        ("bool_param", PbValue::Bool(b)) => config.parameters.put(key.clone(), *b),
                        ("int64_param", PbValue::Int(i)) => {
                            config.parameters.put(key.clone(), *i as i32)
                        }
                        ("double_param", PbValue::Float(f)) => {
                            config.parameters.put(key.clone(), *f)
                        }
                        ("double_param", PbValue::Int(i)) => {
                            config.parameters.put(key.clone(), *i as f64)
                        }
                        ("string_param", PbValue::Str(s)) => {
                            config.parameters.put(key.clone(), s.clone())
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }
}

pub fn parse_config(text: &str) -> Result<ModelConfig> {
    let tokens = tokenize(text)?;
    let mut parser = Parser { tokens, pos: 0 };
    let fields = parser.fields(None)?;

    let mut config = ModelConfig::default();
    for (name, value) in &fields {
        match (name.as_str(), value) {
            ("name", PbValue::Str(s)) => config.name = Some(s.clone()),
            ("platform", PbValue::Str(s)) => config.platform = s.clone(),
            ("inputs", PbValue::Message(inner)) | ("input", PbValue::Message(inner)) => {
                config.inputs.push(tensor_from_fields(inner));
            }
            ("outputs", PbValue::Message(inner)) | ("output", PbValue::Message(inner)) => {
                config.outputs.push(tensor_from_fields(inner));
            }
            ("parameters", PbValue::Message(inner)) => {
                parameter_from_fields(inner, &mut config);
            }
            _ => {}
        }
    }
    if config.platform.is_empty() {
        return Err(Error::FileRead("config declares no platform".into()));
    }
    Ok(config)
}
