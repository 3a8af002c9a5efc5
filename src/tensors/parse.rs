//! Literal and text construction of tensors.

use super::Tensor;
use crate::error::{Error, Result};
use std::str::FromStr;

/// Defines a tensor from nested literal arrays.
///
/// Supports arbitrary dimensionality as long as sublists are uniform in
/// shape. Elements may be any type with an `f64: From<_>` conversion, and a
/// bare literal becomes a one-element tensor of shape `[1]`.
///
/// # Panics
///
/// Panics on ragged literals (rows with mismatched shapes).
///
/// # Example
/// ```
/// use cellnet::tensor;
/// let t = tensor!([[1.0, 2.0], [3.0, 4.0]]);
/// assert_eq!(t.shape(), &[2, 2]);
/// ```
#[macro_export]
macro_rules! tensor {
    ($($body:tt)+) => {
        $crate::tensors::Tensor::from_literal($crate::__tensor_parts!($($body)+))
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __tensor_parts {
    ($lit:literal) => {
        (vec![1usize], vec![f64::from($lit)])
    };

    ([ $( [ $($inner:tt)* ] ),+ $(,)? ]) => {{
        let children: Vec<(Vec<usize>, Vec<f64>)> =
            vec![ $( $crate::__tensor_parts!([ $($inner)* ]) ),+ ];
        let first_shape = children[0].0.clone();
        assert!(
            children.iter().all(|c| c.0 == first_shape),
            "ragged tensor literal (rows have mismatched shapes)"
        );
        let mut shape = vec![children.len()];
        shape.extend_from_slice(&first_shape);
        let data: Vec<f64> = children.into_iter().flat_map(|c| c.1).collect();
        (shape, data)
    }};

    ([ $( $x:expr ),+ $(,)? ]) => {{
        let data: Vec<f64> = vec![ $( f64::from($x) ),+ ];
        (vec![data.len()], data)
    }};
}

/// Deepest bracket nesting accepted by [`parse_tensor`].
pub const MAX_TEXT_RANK: usize = 32;

enum Tok {
    LBrack,
    RBrack,
    Comma,
    Num(f64),
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

impl Lexer<'_> {
    fn skip_ws(&mut self) {
        let s = self.src.as_bytes();
        while self.pos < s.len() && s[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn next(&mut self) -> Result<Tok> {
        self.skip_ws();
        let s = self.src.as_bytes();
        let Some(&c) = s.get(self.pos) else {
            return Err(Error::config("unexpected end of tensor text"));
        };
        self.pos += 1;
        Ok(match c {
            b'[' => Tok::LBrack,
            b']' => Tok::RBrack,
            b',' => Tok::Comma,
            b'-' | b'+' | b'.' | b'0'..=b'9' => {
                let start = self.pos - 1;
                while self.pos < s.len()
                    && matches!(s[self.pos], b'0'..=b'9' | b'.' | b'e' | b'E' | b'+' | b'-')
                {
                    self.pos += 1;
                }
                let text = self
                    .src
                    .get(start..self.pos)
                    .ok_or_else(|| Error::config("bad number"))?;
                let num = text
                    .parse::<f64>()
                    .map_err(|_| Error::config(format!("bad number `{text}`")))?;
                Tok::Num(num)
            }
            other => {
                return Err(Error::config(format!(
                    "invalid character `{}` at byte {}",
                    char::from(other),
                    self.pos - 1
                )));
            }
        })
    }

    /// Parses the rest of an array whose `[` was already consumed, pushing
    /// leaves to `data`, and returns its shape. `depth` counts the open
    /// brackets, this one included.
    fn array(&mut self, data: &mut Vec<f64>, depth: usize) -> Result<Vec<usize>> {
        if depth > MAX_TEXT_RANK {
            return Err(Error::config(format!(
                "tensor text nests deeper than {MAX_TEXT_RANK} levels"
            )));
        }
        let mut count = 0usize;
        let mut inner: Option<Vec<usize>> = None;
        loop {
            match self.next()? {
                Tok::Num(n) if inner.is_none() => data.push(n),
                Tok::LBrack if count == 0 || inner.is_some() => {
                    let shape = self.array(data, depth + 1)?;
                    match &inner {
                        None => inner = Some(shape),
                        Some(prev) if *prev == shape => {}
                        Some(_) => return Err(Error::config("ragged tensor text")),
                    }
                }
                Tok::RBrack if count == 0 => return Err(Error::config("empty array in tensor text")),
                _ => return Err(Error::config("mixed or misplaced values in tensor text")),
            }
            count += 1;
            match self.next()? {
                Tok::Comma => {}
                Tok::RBrack => break,
                _ => return Err(Error::config("expected `,` or `]` in tensor text")),
            }
        }
        let mut shape = vec![count];
        if let Some(rest) = inner {
            shape.extend(rest);
        }
        Ok(shape)
    }
}

/// Parses a JSON-style flat or nested array into a [`Tensor`].
///
/// # Format
/// Accepts arrays like `[1, 2]` or `[[1.0, 2.0], [3.0, 4.0]]`.
///
/// # Errors
/// [`Error::Configuration`] on malformed text, empty or ragged arrays,
/// nesting deeper than [`MAX_TEXT_RANK`], or trailing input after the
/// outermost array.
pub fn parse_tensor(text: &str) -> Result<Tensor> {
    let mut lexer = Lexer { src: text, pos: 0 };
    if !matches!(lexer.next()?, Tok::LBrack) {
        return Err(Error::config("tensor text must start with `[`"));
    }
    let mut data = Vec::new();
    let shape = lexer.array(&mut data, 1)?;
    lexer.skip_ws();
    if lexer.pos != text.len() {
        return Err(Error::config("trailing input after tensor text"));
    }
    Tensor::from_vec(data, &shape)
}

impl FromStr for Tensor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_tensor(s)
    }
}
