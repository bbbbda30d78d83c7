//! Parser for generated kernel text.
//!
//! Accepts the C subset the generator emits: kernel definitions with
//! scalar, vector and pointer parameters; declarations (optionally in
//! `$LOCAL` memory, with constant array extents and `{0}` initializers);
//! assignments and compound assignments; `while`, `for` and `if`; `return`;
//! `$LOCAL_BARRIER`; and expressions over integer literals, names,
//! placeholders, calls, indexing, casts, ternaries and the arithmetic and
//! comparison operators. Line comments and `#pragma` lines are skipped.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit1, multispace1, satisfy},
    combinator::{all_consuming, map, map_opt, map_res, not, opt, peek, recognize, value, verify},
    multi::{many0, many1, separated_list0, separated_list1},
    sequence::{delimited, pair, preceded, terminated},
    IResult, Parser,
};
use symbolic::NumericType;

pub type PResult<'a, T> = IResult<&'a str, T>;

/// Address space a declaration lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qualifier {
    Private,
    Global,
    Local,
    LocalPtr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeSpec {
    pub qualifier: Qualifier,
    pub scalar: NumericType,
    /// Lanes of a vector type; 1 for scalars.
    pub width: u32,
    pub pointer: bool,
    /// Declared as `$SIZE_T`.
    pub size: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
    Mul,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Name(String),
    /// `$GROUP_IDX_0` and friends.
    Placeholder(String),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Cast(TypeSpec, Box<Expr>),
    Index(Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Init {
    /// A brace list of zeros, `{{0}}`.
    Zero,
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decl {
    pub ty: TypeSpec,
    pub name: String,
    pub dims: Vec<usize>,
    pub init: Option<Init>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Block(Vec<Stmt>),
    Decl(Decl),
    Assign(Expr, AssignOp, Expr),
    Expr(Expr),
    While(Expr, Box<Stmt>),
    For {
        init: Box<Stmt>,
        cond: Expr,
        step: Box<Stmt>,
        body: Box<Stmt>,
    },
    If(Expr, Box<Stmt>),
    Return,
    Barrier,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KernelDef {
    pub name: String,
    pub params: Vec<(TypeSpec, String)>,
    pub body: Vec<Stmt>,
}

/// Parse every kernel in `text`.
pub fn parse_program(text: &str) -> Result<Vec<KernelDef>, String> {
    match all_consuming(terminated(many1(kernel), ws)).parse(text) {
        Ok((_, kernels)) => Ok(kernels),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            let offset = text.len() - e.input.len();
            let line = text[..offset].matches('\n').count() + 1;
            let near: String = e.input.trim_start().chars().take(40).collect();
            Err(format!("syntax error on line {} near `{}`", line, near))
        }
        Err(nom::Err::Incomplete(_)) => Err("unexpected end of kernel text".to_string()),
    }
}

// =============================================================================
// Tokens
// =============================================================================

/// Skip whitespace, line comments and `#` directives.
fn ws(input: &str) -> PResult<()> {
    value(
        (),
        many0(alt((
            value((), multispace1),
            value((), line_comment),
            value((), directive),
        ))),
    )
    .parse(input)
}

fn line_comment(input: &str) -> PResult<&str> {
    recognize(pair(tag("//"), take_while(|c| c != '\n'))).parse(input)
}

fn directive(input: &str) -> PResult<&str> {
    recognize(pair(char('#'), take_while(|c| c != '\n'))).parse(input)
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_reserved(word: &str) -> bool {
    matches!(word, "while" | "for" | "if" | "return" | "void" | "unsigned")
}

fn symbol<'a>(sym: &'static str) -> impl FnMut(&'a str) -> PResult<'a, &'a str> {
    move |input| {
        let (input, _) = ws(input)?;
        tag(sym).parse(input)
    }
}

/// `kw` not followed by another word character.
fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> PResult<'a, &'a str> {
    move |input| {
        let (input, _) = ws(input)?;
        terminated(tag(kw), not(peek(satisfy(is_word_char)))).parse(input)
    }
}

fn word(input: &str) -> PResult<&str> {
    let (input, _) = ws(input)?;
    recognize(pair(
        satisfy(|c| c.is_ascii_alphabetic() || c == '_'),
        take_while(is_word_char),
    ))
    .parse(input)
}

fn identifier(input: &str) -> PResult<String> {
    map(verify(word, |w: &str| !is_reserved(w)), str::to_string).parse(input)
}

fn placeholder(input: &str) -> PResult<String> {
    let (input, _) = ws(input)?;
    map(
        recognize(pair(
            char('$'),
            take_while1(|c: char| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_'),
        )),
        str::to_string,
    )
    .parse(input)
}

fn integer(input: &str) -> PResult<i64> {
    let (input, _) = ws(input)?;
    map_res(digit1, str::parse::<i64>).parse(input)
}

// =============================================================================
// Types
// =============================================================================

/// `float`, `double2`, `int`, `long4`, ...
fn scalar_type(name: &str) -> Option<(NumericType, u32)> {
    let stem = name.trim_end_matches(|c: char| c.is_ascii_digit());
    let width = match &name[stem.len()..] {
        "" => 1,
        digits => digits.parse().ok().filter(|w| *w > 1)?,
    };
    let scalar = match stem {
        "float" => NumericType::Float32,
        "double" => NumericType::Float64,
        "int" => NumericType::Int32,
        "long" => NumericType::Int64,
        _ => return None,
    };
    Some((scalar, width))
}

fn type_spec(input: &str) -> PResult<TypeSpec> {
    let (input, qualifier) = opt(alt((
        value(Qualifier::LocalPtr, keyword("$LOCAL_PTR")),
        value(Qualifier::Global, keyword("$GLOBAL")),
        value(Qualifier::Local, keyword("$LOCAL")),
    )))
    .parse(input)?;
    // `unsigned int` widens to 64 bits so loop counters never wrap
    let (input, (scalar, width, size)) = alt((
        value((NumericType::Int64, 1, true), keyword("$SIZE_T")),
        value((NumericType::Int64, 1, false), pair(keyword("unsigned"), keyword("int"))),
        map(map_opt(word, scalar_type), |(s, w)| (s, w, false)),
    ))
    .parse(input)?;
    let (input, star) = opt(symbol("*")).parse(input)?;
    Ok((
        input,
        TypeSpec {
            qualifier: qualifier.unwrap_or(Qualifier::Private),
            scalar,
            width,
            pointer: star.is_some(),
            size,
        },
    ))
}

// =============================================================================
// Expressions
// =============================================================================

pub fn expr(input: &str) -> PResult<Expr> {
    let (input, cond) = equality(input)?;
    let (input, branches) = opt(pair(
        preceded(symbol("?"), expr),
        preceded(symbol(":"), expr),
    ))
    .parse(input)?;
    Ok(match branches {
        Some((then, otherwise)) => (
            input,
            Expr::Ternary(Box::new(cond), Box::new(then), Box::new(otherwise)),
        ),
        None => (input, cond),
    })
}

fn equality(input: &str) -> PResult<Expr> {
    binary_expr(input, relational, &[("==", BinOp::Eq), ("!=", BinOp::Ne)])
}

fn relational(input: &str) -> PResult<Expr> {
    binary_expr(
        input,
        additive,
        &[
            ("<=", BinOp::Le),
            (">=", BinOp::Ge),
            ("<", BinOp::Lt),
            (">", BinOp::Gt),
        ],
    )
}

fn additive(input: &str) -> PResult<Expr> {
    binary_expr(input, multiplicative, &[("+", BinOp::Add), ("-", BinOp::Sub)])
}

fn multiplicative(input: &str) -> PResult<Expr> {
    binary_expr(
        input,
        unary,
        &[("*", BinOp::Mul), ("/", BinOp::Div), ("%", BinOp::Rem)],
    )
}

/// Left-associative chain of `operand (op operand)*`. An operator whose
/// right side does not parse (the `-` of `-=`) ends the chain unconsumed.
fn binary_expr<'a>(
    input: &'a str,
    mut operand: impl FnMut(&'a str) -> PResult<'a, Expr>,
    ops: &[(&'static str, BinOp)],
) -> PResult<'a, Expr> {
    let (mut input, mut left) = operand(input)?;
    loop {
        let (rest, _) = ws(input)?;
        let Some((sym, op)) = ops.iter().find(|(sym, _)| rest.starts_with(sym)) else {
            break;
        };
        match operand(&rest[sym.len()..]) {
            Ok((rest, right)) => {
                left = Expr::Binary(*op, Box::new(left), Box::new(right));
                input = rest;
            }
            Err(nom::Err::Error(_)) => break,
            Err(e) => return Err(e),
        }
    }
    Ok((input, left))
}

fn unary(input: &str) -> PResult<Expr> {
    alt((
        map(
            pair(delimited(symbol("("), type_spec, symbol(")")), unary),
            |(ty, e)| Expr::Cast(ty, Box::new(e)),
        ),
        map(preceded(symbol("-"), unary), |e| Expr::Neg(Box::new(e))),
        postfix,
    ))
    .parse(input)
}

fn postfix(input: &str) -> PResult<Expr> {
    let (input, base) = primary(input)?;
    let (input, indices) = many0(delimited(symbol("["), expr, symbol("]"))).parse(input)?;
    let indexed = indices
        .into_iter()
        .fold(base, |base, index| Expr::Index(Box::new(base), Box::new(index)));
    Ok((input, indexed))
}

fn call_args(input: &str) -> PResult<Vec<Expr>> {
    delimited(symbol("("), separated_list0(symbol(","), expr), symbol(")")).parse(input)
}

fn primary(input: &str) -> PResult<Expr> {
    alt((
        delimited(symbol("("), expr, symbol(")")),
        map(integer, Expr::Int),
        map(pair(identifier, opt(call_args)), |(name, args)| match args {
            Some(args) => Expr::Call(name, args),
            None => Expr::Name(name),
        }),
        map(pair(placeholder, opt(call_args)), |(name, args)| match args {
            Some(args) => Expr::Call(name, args),
            None => Expr::Placeholder(name),
        }),
    ))
    .parse(input)
}

// =============================================================================
// Statements
// =============================================================================

/// `{0}`, `{{0}}`, `{0, 0}`.
fn zero_braces(input: &str) -> PResult<()> {
    value(
        (),
        delimited(
            symbol("{"),
            separated_list1(
                symbol(","),
                alt((zero_braces, value((), verify(integer, |v: &i64| *v == 0)))),
            ),
            symbol("}"),
        ),
    )
    .parse(input)
}

fn declaration(input: &str) -> PResult<Stmt> {
    let (input, ty) = type_spec(input)?;
    let (input, name) = identifier(input)?;
    let (input, dims) = many0(delimited(
        symbol("["),
        map_res(integer, usize::try_from),
        symbol("]"),
    ))
    .parse(input)?;
    let (input, init) = opt(preceded(
        symbol("="),
        alt((value(Init::Zero, zero_braces), map(expr, Init::Expr))),
    ))
    .parse(input)?;
    Ok((
        input,
        Stmt::Decl(Decl {
            ty,
            name,
            dims,
            init,
        }),
    ))
}

fn assign_op(input: &str) -> PResult<AssignOp> {
    alt((
        value(AssignOp::Add, symbol("+=")),
        value(AssignOp::Sub, symbol("-=")),
        value(AssignOp::Mul, symbol("*=")),
        value(AssignOp::Set, symbol("=")),
    ))
    .parse(input)
}

/// An assignment or a bare expression (`$VSTORE2(...)`).
fn simple(input: &str) -> PResult<Stmt> {
    let (input, target) = expr(input)?;
    let (input, op) = opt(assign_op).parse(input)?;
    match op {
        Some(op) => {
            let (input, rhs) = expr(input)?;
            Ok((input, Stmt::Assign(target, op, rhs)))
        }
        None => Ok((input, Stmt::Expr(target))),
    }
}

/// `++i` or `i++`.
fn increment(input: &str) -> PResult<Stmt> {
    map(
        alt((
            preceded(symbol("++"), identifier),
            terminated(identifier, symbol("++")),
        )),
        |name| Stmt::Assign(Expr::Name(name), AssignOp::Add, Expr::Int(1)),
    )
    .parse(input)
}

fn block(input: &str) -> PResult<Vec<Stmt>> {
    delimited(symbol("{"), many0(statement), symbol("}")).parse(input)
}

fn while_stmt(input: &str) -> PResult<Stmt> {
    let (input, _) = keyword("while")(input)?;
    let (input, cond) = delimited(symbol("("), expr, symbol(")")).parse(input)?;
    let (input, body) = statement(input)?;
    Ok((input, Stmt::While(cond, Box::new(body))))
}

fn for_stmt(input: &str) -> PResult<Stmt> {
    let (input, _) = keyword("for")(input)?;
    let (input, _) = symbol("(")(input)?;
    let (input, init) = alt((declaration, simple)).parse(input)?;
    let (input, _) = symbol(";")(input)?;
    let (input, cond) = expr(input)?;
    let (input, _) = symbol(";")(input)?;
    let (input, step) = alt((increment, simple)).parse(input)?;
    let (input, _) = symbol(")")(input)?;
    let (input, body) = statement(input)?;
    Ok((
        input,
        Stmt::For {
            init: Box::new(init),
            cond,
            step: Box::new(step),
            body: Box::new(body),
        },
    ))
}

fn if_stmt(input: &str) -> PResult<Stmt> {
    let (input, _) = keyword("if")(input)?;
    let (input, cond) = delimited(symbol("("), expr, symbol(")")).parse(input)?;
    let (input, body) = statement(input)?;
    Ok((input, Stmt::If(cond, Box::new(body))))
}

fn statement(input: &str) -> PResult<Stmt> {
    alt((
        map(block, Stmt::Block),
        while_stmt,
        for_stmt,
        if_stmt,
        value(Stmt::Return, pair(keyword("return"), symbol(";"))),
        value(Stmt::Barrier, pair(keyword("$LOCAL_BARRIER"), symbol(";"))),
        terminated(declaration, symbol(";")),
        terminated(simple, symbol(";")),
    ))
    .parse(input)
}

fn kernel(input: &str) -> PResult<KernelDef> {
    let (input, _) = keyword("$KERNEL")(input)?;
    let (input, _) = keyword("void")(input)?;
    let (input, name) = identifier(input)?;
    let (input, params) = delimited(
        symbol("("),
        separated_list1(symbol(","), pair(type_spec, identifier)),
        symbol(")"),
    )
    .parse(input)?;
    let (input, body) = block(input)?;
    Ok((input, KernelDef { name, params, body }))
}
