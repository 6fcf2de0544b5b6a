//! C Header Parser
//!
//! A small C header parser that extracts the declarations a generated
//! library header exposes, without libclang. It handles:
//! - Function declarations, including functions returning `struct T *`
//! - Forward struct declarations and struct definitions
//! - Typedefs (plain, `typedef struct T T;`, function pointers)
//! - `#define` flags and simple constants
//! - `extern "C" { ... }` blocks
//!
//! ## Design Philosophy
//!
//! This is a pragmatic parser for the shapes generated headers actually use,
//! not a full C parser. Conditional compilation is not evaluated: every
//! branch is parsed. A declaration that fails to parse is recorded in
//! [`CHeaderParser::errors`] and skipped; parsing resumes at the next `;`.

use std::collections::HashMap;
use std::fmt;

// ============================================================================
// Token Types
// ============================================================================

/// Token types for the C lexer
#[derive(Debug, Clone, PartialEq)]
pub enum CToken {
    // Keywords
    Struct,
    Union,
    Enum,
    Typedef,
    Const,
    Volatile,
    Extern,
    Static,
    Inline,
    Unsigned,
    Signed,
    Void,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Bool,
    SizeT,

    // Identifiers and literals
    Identifier(String),
    IntLiteral(i64),
    FloatLiteral(f64),
    StringLiteral(String),
    CharLiteral(char),

    // Operators and punctuation
    Star,         // *
    Minus,        // -
    Semicolon,    // ;
    Comma,        // ,
    OpenBrace,    // {
    CloseBrace,   // }
    OpenParen,    // (
    CloseParen,   // )
    OpenBracket,  // [
    CloseBracket, // ]
    Equals,       // =
    Ellipsis,     // ...

    /// A whole preprocessor line: `#name body`, continuations joined
    Directive { name: String, body: String },

    // End of input
    Eof,
}

// ============================================================================
// C Type Representation
// ============================================================================

/// Represents a C type
#[derive(Debug, Clone, PartialEq)]
pub enum CType {
    Void,
    Char,
    UChar,
    SChar,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    LongLong,
    ULongLong,
    Float,
    Double,
    LongDouble,
    Bool,
    SizeT,
    SSizeT,
    IntPtrT,
    UIntPtrT,
    PtrDiffT,
    /// `int8_t`
    Int8,
    /// `int16_t`
    Int16,
    /// `int32_t`
    Int32,
    /// `int64_t`
    Int64,
    /// `uint8_t`
    UInt8,
    /// `uint16_t`
    UInt16,
    /// `uint32_t`
    UInt32,
    /// `uint64_t`
    UInt64,
    /// Pointer to a type
    Pointer(Box<CType>),
    /// Const-qualified type
    Const(Box<CType>),
    /// Volatile-qualified type
    Volatile(Box<CType>),
    /// Fixed or unsized array
    Array(Box<CType>, Option<usize>),
    /// Named type: `struct T`, `union T`, `enum T` or an unresolved typedef
    Named(String),
}

impl CType {
    /// Strip top-level `const`/`volatile` qualifiers
    pub fn strip_qualifiers(&self) -> &CType {
        match self {
            CType::Const(inner) | CType::Volatile(inner) => inner.strip_qualifiers(),
            _ => self,
        }
    }

    /// The same type with qualifiers removed at every level
    pub fn unqualified(&self) -> CType {
        match self.strip_qualifiers() {
            CType::Pointer(inner) => CType::Pointer(Box::new(inner.unqualified())),
            CType::Array(inner, n) => CType::Array(Box::new(inner.unqualified()), *n),
            other => other.clone(),
        }
    }

    /// Check if this type is a pointer type, ignoring qualifiers
    pub fn is_pointer(&self) -> bool {
        matches!(self.strip_qualifiers(), CType::Pointer(_))
    }

    /// Check if this type is const-qualified
    pub fn is_const(&self) -> bool {
        matches!(self, CType::Const(_))
    }

    /// The unqualified pointee if this is a pointer
    pub fn pointee(&self) -> Option<&CType> {
        match self.strip_qualifiers() {
            CType::Pointer(inner) => Some(inner.strip_qualifiers()),
            _ => None,
        }
    }

    /// Number of pointer levels
    pub fn pointer_depth(&self) -> usize {
        match self.pointee() {
            Some(inner) => 1 + inner.pointer_depth(),
            None => 0,
        }
    }

    /// The tag of a `struct T` type
    pub fn struct_tag(&self) -> Option<&str> {
        match self.strip_qualifiers() {
            CType::Named(name) => name.strip_prefix("struct "),
            _ => None,
        }
    }

    /// Get the base type, stripping qualifiers and pointers
    pub fn base_type(&self) -> &CType {
        match self {
            CType::Pointer(inner) => inner.base_type(),
            CType::Const(inner) => inner.base_type(),
            CType::Volatile(inner) => inner.base_type(),
            CType::Array(inner, _) => inner.base_type(),
            _ => self,
        }
    }
}

impl fmt::Display for CType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CType::Void => write!(f, "void"),
            CType::Char => write!(f, "char"),
            CType::UChar => write!(f, "unsigned char"),
            CType::SChar => write!(f, "signed char"),
            CType::Short => write!(f, "short"),
            CType::UShort => write!(f, "unsigned short"),
            CType::Int => write!(f, "int"),
            CType::UInt => write!(f, "unsigned int"),
            CType::Long => write!(f, "long"),
            CType::ULong => write!(f, "unsigned long"),
            CType::LongLong => write!(f, "long long"),
            CType::ULongLong => write!(f, "unsigned long long"),
            CType::Float => write!(f, "float"),
            CType::Double => write!(f, "double"),
            CType::LongDouble => write!(f, "long double"),
            CType::Bool => write!(f, "bool"),
            CType::SizeT => write!(f, "size_t"),
            CType::SSizeT => write!(f, "ssize_t"),
            CType::IntPtrT => write!(f, "intptr_t"),
            CType::UIntPtrT => write!(f, "uintptr_t"),
            CType::PtrDiffT => write!(f, "ptrdiff_t"),
            CType::Int8 => write!(f, "int8_t"),
            CType::Int16 => write!(f, "int16_t"),
            CType::Int32 => write!(f, "int32_t"),
            CType::Int64 => write!(f, "int64_t"),
            CType::UInt8 => write!(f, "uint8_t"),
            CType::UInt16 => write!(f, "uint16_t"),
            CType::UInt32 => write!(f, "uint32_t"),
            CType::UInt64 => write!(f, "uint64_t"),
            CType::Pointer(inner) => write!(f, "{}*", inner),
            CType::Const(inner) => write!(f, "const {}", inner),
            CType::Volatile(inner) => write!(f, "volatile {}", inner),
            CType::Array(inner, Some(n)) => write!(f, "{}[{}]", inner, n),
            CType::Array(inner, None) => write!(f, "{}[]", inner),
            CType::Named(name) => write!(f, "{}", name),
        }
    }
}

/// A field in a C struct
#[derive(Debug, Clone, PartialEq)]
pub struct CStructField {
    /// Field name
    pub name: String,
    /// Field type
    pub ty: CType,
}

// ============================================================================
// Declarations
// ============================================================================

/// A top-level C declaration
#[derive(Debug, Clone, PartialEq)]
pub enum CDeclaration {
    Function(CFunctionDecl),
    Struct(CStructDecl),
    Typedef(CTypedefDecl),
    Constant(CConstantDecl),
    Variable(CVariableDecl),
}

/// A function prototype
#[derive(Debug, Clone, PartialEq)]
pub struct CFunctionDecl {
    /// Function name
    pub name: String,
    /// Return type
    pub return_type: CType,
    /// Parameters in declaration order
    pub params: Vec<CFunctionParam>,
    /// Whether the parameter list ends in `...`
    pub variadic: bool,
    /// Declared `inline`
    pub is_inline: bool,
    /// Declared `static`
    pub is_static: bool,
}

impl fmt::Display for CFunctionDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}(", self.return_type, self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", param.ty)?;
            if let Some(name) = &param.name {
                write!(f, " {}", name)?;
            }
        }
        if self.variadic {
            if !self.params.is_empty() {
                write!(f, ", ")?;
            }
            write!(f, "...")?;
        }
        write!(f, ")")
    }
}

/// A function parameter
#[derive(Debug, Clone, PartialEq)]
pub struct CFunctionParam {
    /// Parameter name, if the prototype gives one
    pub name: Option<String>,
    /// Parameter type
    pub ty: CType,
}

/// A struct declaration; `fields` is `None` for a forward declaration
#[derive(Debug, Clone, PartialEq)]
pub struct CStructDecl {
    pub name: String,
    pub fields: Option<Vec<CStructField>>,
}

/// A typedef
#[derive(Debug, Clone, PartialEq)]
pub struct CTypedefDecl {
    pub name: String,
    pub ty: CType,
}

/// A `#define NAME [value]`
#[derive(Debug, Clone, PartialEq)]
pub struct CConstantDecl {
    pub name: String,
    pub value: CConstantValue,
}

/// The value of a `#define`
#[derive(Debug, Clone, PartialEq)]
pub enum CConstantValue {
    Integer(i64),
    Float(f64),
    String(String),
    Char(char),
    /// `#define NAME` with no body
    Flag,
    /// Anything else, kept as source text
    Unknown(String),
}

/// A global variable declaration
#[derive(Debug, Clone, PartialEq)]
pub struct CVariableDecl {
    pub name: String,
    pub ty: CType,
}

// ============================================================================
// Lexer
// ============================================================================

/// C lexer for tokenizing C header files
pub struct CLexer<'a> {
    input: &'a str,
    position: usize,
    line: usize,
    column: usize,
}

impl<'a> CLexer<'a> {
    /// Create a new lexer
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            position: 0,
            line: 1,
            column: 1,
        }
    }

    /// Get the current position
    pub fn position(&self) -> (usize, usize) {
        (self.line, self.column)
    }

    /// The input not yet consumed
    fn remaining(&self) -> &'a str {
        &self.input[self.position..]
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn peek_next(&self) -> Option<char> {
        self.remaining().chars().nth(1)
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.position += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    /// Consume characters while `pred` holds, appending them to `out`
    fn take_while(&mut self, out: &mut String, pred: impl Fn(char) -> bool) {
        while let Some(c) = self.peek().filter(|c| pred(*c)) {
            out.push(c);
            self.advance();
        }
    }

    /// Skip whitespace and comments
    fn skip_whitespace_and_comments(&mut self) {
        loop {
            while self.peek().map_or(false, |c| c.is_whitespace()) {
                self.advance();
            }

            if self.peek() == Some('/') {
                if self.peek_next() == Some('/') {
                    while self.peek().map_or(false, |c| c != '\n') {
                        self.advance();
                    }
                    continue;
                } else if self.peek_next() == Some('*') {
                    self.advance();
                    self.advance();
                    while !(self.peek() == Some('*') && self.peek_next() == Some('/')) {
                        if self.advance().is_none() {
                            break;
                        }
                    }
                    self.advance();
                    self.advance();
                    continue;
                }
            }

            break;
        }
    }

    fn read_identifier(&mut self) -> String {
        let mut ident = String::new();
        self.take_while(&mut ident, |c| c.is_alphanumeric() || c == '_');
        ident
    }

    fn read_number(&mut self) -> CToken {
        let mut num_str = String::new();
        let mut is_float = false;
        let mut is_hex = false;

        if self.peek() == Some('0') && self.peek_next().map_or(false, |c| c == 'x' || c == 'X') {
            self.advance();
            self.advance();
            is_hex = true;
        }

        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || (is_hex && c.is_ascii_hexdigit()) {
                num_str.push(c);
            } else if c == '.' && !is_float && !is_hex {
                is_float = true;
                num_str.push(c);
            } else if (c == 'e' || c == 'E') && !is_hex {
                is_float = true;
                num_str.push(c);
                self.advance();
                if let Some(sign) = self.peek().filter(|s| *s == '-' || *s == '+') {
                    num_str.push(sign);
                    self.advance();
                }
                continue;
            } else {
                break;
            }
            self.advance();
        }

        // Suffixes: L, LL, U, UL, ULL, F
        while self.peek().map_or(false, |c| matches!(c, 'L' | 'l' | 'U' | 'u' | 'F' | 'f')) {
            self.advance();
        }

        if is_float {
            CToken::FloatLiteral(num_str.parse().unwrap_or(0.0))
        } else if is_hex {
            CToken::IntLiteral(i64::from_str_radix(&num_str, 16).unwrap_or(0))
        } else {
            CToken::IntLiteral(num_str.parse().unwrap_or(0))
        }
    }

    fn read_escape(&mut self) -> Option<char> {
        Some(match self.advance()? {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            '0' => '\0',
            other => other,
        })
    }

    fn read_string(&mut self) -> String {
        let mut s = String::new();
        self.advance(); // Opening quote
        while let Some(c) = self.advance() {
            match c {
                '"' => break,
                '\\' => s.extend(self.read_escape()),
                _ => s.push(c),
            }
        }
        s
    }

    fn read_char(&mut self) -> char {
        self.advance(); // Opening quote
        let c = match self.advance() {
            Some('\\') => self.read_escape().unwrap_or('\0'),
            Some(c) => c,
            None => '\0',
        };
        self.advance(); // Closing quote
        c
    }

    /// Read a preprocessor line into a single token
    fn read_directive(&mut self) -> CToken {
        self.advance(); // #
        while self.peek().map_or(false, |c| c == ' ' || c == '\t') {
            self.advance();
        }
        let name = self.read_identifier();

        let mut body = String::new();
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            if c == '\\' && self.peek_next() == Some('\n') {
                self.advance();
                self.advance();
                body.push(' ');
                continue;
            }
            body.push(c);
            self.advance();
        }

        CToken::Directive {
            name,
            body: body.trim().to_string(),
        }
    }

    fn punct(&mut self, token: CToken) -> CToken {
        self.advance();
        token
    }

    /// Get the next token
    pub fn next_token(&mut self) -> CToken {
        self.skip_whitespace_and_comments();

        match self.peek() {
            None => CToken::Eof,
            Some('#') => self.read_directive(),
            Some('"') => CToken::StringLiteral(self.read_string()),
            Some('\'') => CToken::CharLiteral(self.read_char()),
            Some(c) if c.is_ascii_digit() => self.read_number(),
            Some(c) if c.is_alphabetic() || c == '_' => {
                let ident = self.read_identifier();
                match ident.as_str() {
                    "struct" => CToken::Struct,
                    "union" => CToken::Union,
                    "enum" => CToken::Enum,
                    "typedef" => CToken::Typedef,
                    "const" => CToken::Const,
                    "volatile" => CToken::Volatile,
                    "extern" => CToken::Extern,
                    "static" => CToken::Static,
                    "inline" | "__inline" | "__inline__" => CToken::Inline,
                    "unsigned" => CToken::Unsigned,
                    "signed" => CToken::Signed,
                    "void" => CToken::Void,
                    "char" => CToken::Char,
                    "short" => CToken::Short,
                    "int" => CToken::Int,
                    "long" => CToken::Long,
                    "float" => CToken::Float,
                    "double" => CToken::Double,
                    "_Bool" | "bool" => CToken::Bool,
                    "size_t" => CToken::SizeT,
                    _ => CToken::Identifier(ident),
                }
            }
            Some('*') => self.punct(CToken::Star),
            Some('-') => self.punct(CToken::Minus),
            Some(';') => self.punct(CToken::Semicolon),
            Some(',') => self.punct(CToken::Comma),
            Some('{') => self.punct(CToken::OpenBrace),
            Some('}') => self.punct(CToken::CloseBrace),
            Some('(') => self.punct(CToken::OpenParen),
            Some(')') => self.punct(CToken::CloseParen),
            Some('[') => self.punct(CToken::OpenBracket),
            Some(']') => self.punct(CToken::CloseBracket),
            Some('=') => self.punct(CToken::Equals),
            Some('.') if self.remaining().starts_with("...") => {
                self.advance();
                self.advance();
                self.punct(CToken::Ellipsis)
            }
            Some(_) => {
                // Skip unknown characters
                self.advance();
                self.next_token()
            }
        }
    }

    /// Peek at the next token without consuming it
    pub fn peek_token(&mut self) -> CToken {
        let saved = (self.position, self.line, self.column);
        let token = self.next_token();
        (self.position, self.line, self.column) = saved;
        token
    }
}

// ============================================================================
// Parser
// ============================================================================

/// Parse error
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.column, self.message)
    }
}

impl std::error::Error for ParseError {}

/// C header parser
pub struct CHeaderParser<'a> {
    lexer: CLexer<'a>,
    current_token: CToken,
    /// Type aliases from typedefs
    type_aliases: HashMap<String, CType>,
    /// Open `extern "C" {` blocks
    extern_depth: usize,
    /// Declarations produced as a side effect of another one
    pending: Vec<CDeclaration>,
    /// Declarations skipped after a parse error
    errors: Vec<ParseError>,
}

impl<'a> CHeaderParser<'a> {
    /// Create a new parser
    pub fn new(input: &'a str) -> Self {
        let mut lexer = CLexer::new(input);
        let current_token = lexer.next_token();
        Self {
            lexer,
            current_token,
            type_aliases: HashMap::new(),
            extern_depth: 0,
            pending: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Get all registered type aliases
    pub fn type_aliases(&self) -> &HashMap<String, CType> {
        &self.type_aliases
    }

    /// Errors recovered from while parsing
    pub fn errors(&self) -> &[ParseError] {
        &self.errors
    }

    fn advance(&mut self) {
        self.current_token = self.lexer.next_token();
    }

    fn expect(&mut self, expected: CToken) -> Result<(), ParseError> {
        if std::mem::discriminant(&self.current_token) == std::mem::discriminant(&expected) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!(
                "Expected {:?}, found {:?}",
                expected, self.current_token
            )))
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        let (line, column) = self.lexer.position();
        ParseError {
            message: message.into(),
            line,
            column,
        }
    }

    fn expect_identifier(&mut self, what: &str) -> Result<String, ParseError> {
        match &self.current_token {
            CToken::Identifier(s) => {
                let s = s.clone();
                self.advance();
                Ok(s)
            }
            other => Err(self.error(format!("Expected {}, found {:?}", what, other))),
        }
    }

    /// Parse the entire header
    pub fn parse(&mut self) -> Vec<CDeclaration> {
        let mut declarations = Vec::new();

        while self.current_token != CToken::Eof {
            match self.parse_declaration() {
                Ok(decl) => {
                    declarations.append(&mut self.pending);
                    declarations.extend(decl);
                }
                Err(e) => {
                    tracing::debug!(error = %e, "skipping unparsable declaration");
                    self.errors.push(e);
                    self.skip_to_recovery_point();
                }
            }
        }

        declarations
    }

    /// Skip to a recovery point (semicolon or closing brace)
    fn skip_to_recovery_point(&mut self) {
        let mut brace_depth = 0;
        loop {
            match &self.current_token {
                CToken::Eof => break,
                CToken::Semicolon if brace_depth == 0 => {
                    self.advance();
                    break;
                }
                CToken::OpenBrace => {
                    brace_depth += 1;
                    self.advance();
                }
                CToken::CloseBrace => {
                    if brace_depth == 0 {
                        // Belongs to an enclosing extern "C" block
                        break;
                    }
                    brace_depth -= 1;
                    self.advance();
                    if brace_depth == 0 {
                        if self.current_token == CToken::Semicolon {
                            self.advance();
                        }
                        break;
                    }
                }
                _ => self.advance(),
            }
        }
    }

    fn parse_declaration(&mut self) -> Result<Option<CDeclaration>, ParseError> {
        match &self.current_token {
            CToken::Directive { name, body } => {
                let decl = if name == "define" {
                    parse_define(body)
                } else {
                    None
                };
                self.advance();
                Ok(decl)
            }
            CToken::Typedef => self.parse_typedef(),
            CToken::Struct => self.parse_struct_or_function(),
            CToken::Union | CToken::Enum => {
                self.skip_to_recovery_point();
                Ok(None)
            }
            CToken::Extern => self.parse_extern_decl(),
            CToken::CloseBrace => {
                self.extern_depth = self.extern_depth.saturating_sub(1);
                self.advance();
                Ok(None)
            }
            CToken::Identifier(_)
            | CToken::Static
            | CToken::Inline
            | CToken::Void
            | CToken::Char
            | CToken::Short
            | CToken::Int
            | CToken::Long
            | CToken::Float
            | CToken::Double
            | CToken::Unsigned
            | CToken::Signed
            | CToken::Const
            | CToken::Volatile
            | CToken::SizeT
            | CToken::Bool => self.parse_function_or_variable(),
            CToken::Eof => Ok(None),
            _ => {
                self.advance();
                Ok(None)
            }
        }
    }

    /// Parse a typedef
    fn parse_typedef(&mut self) -> Result<Option<CDeclaration>, ParseError> {
        self.advance(); // typedef

        let underlying = if self.current_token == CToken::Struct {
            self.advance();
            let tag = match &self.current_token {
                CToken::Identifier(s) => {
                    let s = s.clone();
                    self.advance();
                    Some(s)
                }
                _ => None,
            };
            let fields = if self.current_token == CToken::OpenBrace {
                Some(self.parse_struct_body()?)
            } else {
                None
            };
            let named = match (&tag, &self.current_token) {
                (Some(tag), _) => tag.clone(),
                // typedef struct { ... } Name;
                (None, CToken::Identifier(alias)) => alias.clone(),
                (None, _) => return Err(self.error("Expected struct name")),
            };
            if let Some(fields) = fields {
                self.pending.push(CDeclaration::Struct(CStructDecl {
                    name: named.clone(),
                    fields: Some(fields),
                }));
            }
            self.finish_type(CType::Named(format!("struct {}", named)), false, false)?
        } else {
            self.parse_type()?
        };

        // typedef ret (*name)(params);
        if self.current_token == CToken::OpenParen {
            self.advance();
            self.expect(CToken::Star)?;
            let name = self.expect_identifier("typedef name")?;
            self.expect(CToken::CloseParen)?;
            self.skip_balanced_parens()?;
            self.expect(CToken::Semicolon)?;
            let ty = CType::Pointer(Box::new(CType::Void));
            self.type_aliases.insert(name.clone(), ty.clone());
            return Ok(Some(CDeclaration::Typedef(CTypedefDecl { name, ty })));
        }

        let name = match &self.current_token {
            CToken::Identifier(s) => s.clone(),
            CToken::SizeT => "size_t".to_string(),
            CToken::Bool => "bool".to_string(),
            other => return Err(self.error(format!("Expected typedef name, found {:?}", other))),
        };
        self.advance();

        let ty = if self.current_token == CToken::OpenBracket {
            self.parse_array_suffix(underlying)?
        } else {
            underlying
        };
        self.expect(CToken::Semicolon)?;

        self.type_aliases.insert(name.clone(), ty.clone());
        Ok(Some(CDeclaration::Typedef(CTypedefDecl { name, ty })))
    }

    /// `struct T;`, `struct T { ... };` or a declaration whose type starts with `struct T`
    fn parse_struct_or_function(&mut self) -> Result<Option<CDeclaration>, ParseError> {
        self.advance(); // struct
        let name = self.expect_identifier("struct name")?;

        match self.current_token {
            CToken::Semicolon => {
                self.advance();
                Ok(Some(CDeclaration::Struct(CStructDecl { name, fields: None })))
            }
            CToken::OpenBrace => {
                let fields = self.parse_struct_body()?;
                self.expect(CToken::Semicolon)?;
                Ok(Some(CDeclaration::Struct(CStructDecl {
                    name,
                    fields: Some(fields),
                })))
            }
            _ => {
                let ty = self.finish_type(CType::Named(format!("struct {}", name)), false, false)?;
                self.parse_declarator(ty, false, false)
            }
        }
    }

    fn parse_struct_body(&mut self) -> Result<Vec<CStructField>, ParseError> {
        self.expect(CToken::OpenBrace)?;
        let mut fields = Vec::new();

        while self.current_token != CToken::CloseBrace && self.current_token != CToken::Eof {
            let ty = self.parse_type()?;
            loop {
                let name = self.expect_identifier("field name")?;
                let ty = if self.current_token == CToken::OpenBracket {
                    self.parse_array_suffix(ty.clone())?
                } else {
                    ty.clone()
                };
                fields.push(CStructField { name, ty });
                if self.current_token == CToken::Comma {
                    self.advance();
                } else {
                    break;
                }
            }
            self.expect(CToken::Semicolon)?;
        }

        self.expect(CToken::CloseBrace)?;
        Ok(fields)
    }

    fn parse_extern_decl(&mut self) -> Result<Option<CDeclaration>, ParseError> {
        self.advance(); // extern

        if let CToken::StringLiteral(_) = &self.current_token {
            self.advance();
            if self.current_token == CToken::OpenBrace {
                self.advance();
                self.extern_depth += 1;
                return Ok(None);
            }
        }

        self.parse_declaration()
    }

    fn parse_function_or_variable(&mut self) -> Result<Option<CDeclaration>, ParseError> {
        let mut is_static = false;
        let mut is_inline = false;

        loop {
            match &self.current_token {
                CToken::Static => is_static = true,
                CToken::Inline => is_inline = true,
                CToken::Extern => {}
                _ => break,
            }
            self.advance();
        }

        let ty = self.parse_type()?;
        self.parse_declarator(ty, is_static, is_inline)
    }

    /// Parse what follows a declaration's type: the name, then parameters or an initializer
    fn parse_declarator(
        &mut self,
        ty: CType,
        is_static: bool,
        is_inline: bool,
    ) -> Result<Option<CDeclaration>, ParseError> {
        let name = self.expect_identifier("declaration name")?;

        if self.current_token == CToken::OpenParen {
            self.advance();
            let (params, variadic) = self.parse_function_params()?;
            self.expect(CToken::CloseParen)?;

            if self.current_token == CToken::OpenBrace {
                self.skip_to_recovery_point();
            } else {
                self.expect(CToken::Semicolon)?;
            }

            return Ok(Some(CDeclaration::Function(CFunctionDecl {
                name,
                return_type: ty,
                params,
                variadic,
                is_inline,
                is_static,
            })));
        }

        let ty = if self.current_token == CToken::OpenBracket {
            self.parse_array_suffix(ty)?
        } else {
            ty
        };

        if self.current_token == CToken::Equals {
            while self.current_token != CToken::Semicolon && self.current_token != CToken::Eof {
                self.advance();
            }
        }
        self.expect(CToken::Semicolon)?;

        Ok(Some(CDeclaration::Variable(CVariableDecl { name, ty })))
    }

    fn parse_function_params(&mut self) -> Result<(Vec<CFunctionParam>, bool), ParseError> {
        let mut params = Vec::new();
        let mut variadic = false;

        // (void)
        if self.current_token == CToken::Void && self.lexer.peek_token() == CToken::CloseParen {
            self.advance();
            return Ok((params, false));
        }

        while self.current_token != CToken::CloseParen && self.current_token != CToken::Eof {
            if self.current_token == CToken::Ellipsis {
                variadic = true;
                self.advance();
                break;
            }

            let param_type = self.parse_type()?;
            let name = match &self.current_token {
                CToken::Identifier(s) => {
                    let name = s.clone();
                    self.advance();
                    Some(name)
                }
                _ => None,
            };

            // Arrays decay to pointers in parameter position
            let ty = if self.current_token == CToken::OpenBracket {
                while self.current_token != CToken::CloseBracket && self.current_token != CToken::Eof {
                    self.advance();
                }
                self.expect(CToken::CloseBracket)?;
                CType::Pointer(Box::new(param_type))
            } else {
                param_type
            };

            params.push(CFunctionParam { name, ty });

            if self.current_token == CToken::Comma {
                self.advance();
            } else {
                break;
            }
        }

        Ok((params, variadic))
    }

    fn skip_balanced_parens(&mut self) -> Result<(), ParseError> {
        self.expect(CToken::OpenParen)?;
        let mut depth = 1usize;
        while depth > 0 {
            match self.current_token {
                CToken::OpenParen => depth += 1,
                CToken::CloseParen => depth -= 1,
                CToken::Eof => return Err(self.error("Unbalanced parentheses")),
                _ => {}
            }
            self.advance();
        }
        Ok(())
    }

    /// Parse a C type
    fn parse_type(&mut self) -> Result<CType, ParseError> {
        let mut is_const = false;
        let mut is_volatile = false;
        let mut is_unsigned = false;
        let mut is_signed = false;

        loop {
            match &self.current_token {
                CToken::Const => is_const = true,
                CToken::Volatile => is_volatile = true,
                CToken::Unsigned => is_unsigned = true,
                CToken::Signed => is_signed = true,
                _ => break,
            }
            self.advance();
        }

        let pick = |unsigned: CType, plain: CType| if is_unsigned { unsigned } else { plain };

        let base_type = match &self.current_token {
            CToken::Void => {
                self.advance();
                CType::Void
            }
            CToken::Char => {
                self.advance();
                if is_unsigned {
                    CType::UChar
                } else if is_signed {
                    CType::SChar
                } else {
                    CType::Char
                }
            }
            CToken::Short => {
                self.advance();
                if self.current_token == CToken::Int {
                    self.advance();
                }
                pick(CType::UShort, CType::Short)
            }
            CToken::Int => {
                self.advance();
                pick(CType::UInt, CType::Int)
            }
            CToken::Long => {
                self.advance();
                match &self.current_token {
                    CToken::Long => {
                        self.advance();
                        if self.current_token == CToken::Int {
                            self.advance();
                        }
                        pick(CType::ULongLong, CType::LongLong)
                    }
                    CToken::Double => {
                        self.advance();
                        CType::LongDouble
                    }
                    CToken::Int => {
                        self.advance();
                        pick(CType::ULong, CType::Long)
                    }
                    _ => pick(CType::ULong, CType::Long),
                }
            }
            CToken::Float => {
                self.advance();
                CType::Float
            }
            CToken::Double => {
                self.advance();
                CType::Double
            }
            CToken::Bool => {
                self.advance();
                CType::Bool
            }
            CToken::SizeT => {
                self.advance();
                CType::SizeT
            }
            CToken::Struct | CToken::Union | CToken::Enum => {
                let keyword = match self.current_token {
                    CToken::Struct => "struct",
                    CToken::Union => "union",
                    _ => "enum",
                };
                self.advance();
                let name = self.expect_identifier("tag name")?;
                CType::Named(format!("{} {}", keyword, name))
            }
            CToken::Identifier(name) => {
                let name = name.clone();
                self.advance();
                match name.as_str() {
                    "ssize_t" => CType::SSizeT,
                    "intptr_t" => CType::IntPtrT,
                    "uintptr_t" => CType::UIntPtrT,
                    "ptrdiff_t" => CType::PtrDiffT,
                    "int8_t" => CType::Int8,
                    "int16_t" => CType::Int16,
                    "int32_t" => CType::Int32,
                    "int64_t" => CType::Int64,
                    "uint8_t" => CType::UInt8,
                    "uint16_t" => CType::UInt16,
                    "uint32_t" => CType::UInt32,
                    "uint64_t" => CType::UInt64,
                    _ => self
                        .type_aliases
                        .get(&name)
                        .cloned()
                        .unwrap_or(CType::Named(name)),
                }
            }
            _ => {
                // `unsigned`/`signed` alone mean int
                if is_unsigned {
                    CType::UInt
                } else if is_signed {
                    CType::Int
                } else {
                    return Err(self.error(format!(
                        "Expected type, found {:?}",
                        self.current_token
                    )));
                }
            }
        };

        self.finish_type(base_type, is_const, is_volatile)
    }

    /// Trailing qualifiers and pointer levels after a base type
    fn finish_type(
        &mut self,
        base_type: CType,
        mut is_const: bool,
        mut is_volatile: bool,
    ) -> Result<CType, ParseError> {
        let mut result = base_type;
        loop {
            match self.current_token {
                CToken::Const => is_const = true,
                CToken::Volatile => is_volatile = true,
                CToken::Star => result = CType::Pointer(Box::new(result)),
                _ => break,
            }
            self.advance();
        }

        if is_volatile {
            result = CType::Volatile(Box::new(result));
        }
        if is_const {
            result = CType::Const(Box::new(result));
        }

        Ok(result)
    }

    /// Parse array suffix [N] or []
    fn parse_array_suffix(&mut self, element_type: CType) -> Result<CType, ParseError> {
        self.expect(CToken::OpenBracket)?;

        let size = match &self.current_token {
            CToken::IntLiteral(n) => {
                let size = usize::try_from(*n).ok();
                self.advance();
                size
            }
            _ => {
                while self.current_token != CToken::CloseBracket && self.current_token != CToken::Eof {
                    self.advance();
                }
                None
            }
        };

        self.expect(CToken::CloseBracket)?;

        if self.current_token == CToken::OpenBracket {
            let inner = self.parse_array_suffix(element_type)?;
            Ok(CType::Array(Box::new(inner), size))
        } else {
            Ok(CType::Array(Box::new(element_type), size))
        }
    }
}

/// Parse the body of a `#define` line
fn parse_define(body: &str) -> Option<CDeclaration> {
    let mut lexer = CLexer::new(body);
    let name = match lexer.next_token() {
        CToken::Identifier(name) => name,
        _ => return None,
    };

    // Function-like macros
    if lexer.remaining().starts_with('(') {
        return None;
    }

    let value = match lexer.next_token() {
        CToken::Eof => CConstantValue::Flag,
        CToken::IntLiteral(n) => CConstantValue::Integer(n),
        CToken::FloatLiteral(n) => CConstantValue::Float(n),
        CToken::StringLiteral(s) => CConstantValue::String(s),
        CToken::CharLiteral(c) => CConstantValue::Char(c),
        CToken::Minus => match lexer.next_token() {
            CToken::IntLiteral(n) => CConstantValue::Integer(-n),
            CToken::FloatLiteral(n) => CConstantValue::Float(-n),
            _ => CConstantValue::Unknown(body[name.len()..].trim().to_string()),
        },
        _ => CConstantValue::Unknown(body[name.len()..].trim().to_string()),
    };

    Some(CDeclaration::Constant(CConstantDecl { name, value }))
}

/// Parse a header, returning every declaration that could be read
pub fn parse_header(source: &str) -> Vec<CDeclaration> {
    CHeaderParser::new(source).parse()
}

// ============================================================================
// Tests
// ============================================================================
