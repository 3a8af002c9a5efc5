//! Saving and loading layers as an ordered value stream.
//!
//! # Stream Format
//!
//! A layer is written as plain text, one item per line:
//!
//! ```text
//! ┌──────┬──────────────────────────────────────────────────────────┐
//! │ 1    │ kind tag (`dense`, `conv`, `max_pool`, `avg_pool`, ...)  │
//! │ 2    │ input shape, space separated                             │
//! │ 3    │ output shape, space separated                            │
//! ├──────┼──────────────────────────────────────────────────────────┤
//! │      │ trainable layers                                         │
//! │ 4    │ activation tag (`relu`, `leaky_relu:0.01`, ...)          │
//! │ 5    │ bias flag (`true` / `false`)                             │
//! │ 5b   │ `kh kw sh sw` (convolution only)                         │
//! │ 6    │ every kernel scalar, row-major in the kernel's shape     │
//! │ 7    │ every bias scalar, if the bias is enabled                │
//! ├──────┼──────────────────────────────────────────────────────────┤
//! │      │ pooling layers                                           │
//! │ 4'   │ window `fh fw`                                           │
//! │ 5'   │ stride `sh sw`                                           │
//! └──────┴──────────────────────────────────────────────────────────┘
//! ```
//!
//! Row-major kernel order is filter → input channel → row → column for
//! convolutions and input → unit for dense layers. Scalars use Rust's
//! shortest round-trip formatting, so a write followed by a read restores
//! every weight bit for bit.
//!
//! Reading rebuilds the layer from its configuration lines *before* any
//! scalar is consumed, then loads kernel and bias in the order they were
//! written. Each parameter block is checked (count and finiteness) before it
//! reaches the layer.
//!
//! A model file is the line `cellnet`, the layer count, then every layer.
//!
//! # Example
//!
//! ```rust
//! use cellnet::activation::Activation;
//! use cellnet::layers::{Dense, Layer};
//! use cellnet::modelio::{read_layer, write_layer};
//!
//! let mut dense = Dense::new(2, Activation::ReLU).unwrap();
//! dense.build(&[3]).unwrap();
//!
//! let mut buf = Vec::new();
//! write_layer(&dense, &mut buf).unwrap();
//! let restored = read_layer(&mut buf.as_slice()).unwrap();
//! assert_eq!(restored.output_shape().unwrap(), &[2]);
//! ```

use crate::activation::Activation;
use crate::error::{Error, Result};
use crate::layers::{AvgPool, Conv, Dense, Flatten, Layer, LayerKind, MaxPool};
use crate::model::Sequential;
use briny::prelude::*;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

const MODEL_HEADER: &str = "cellnet";

/// One parameter block as read from a stream.
struct ParamRecord {
    shape: Vec<usize>,
    values: Vec<f64>,
}

impl Validate for ParamRecord {
    fn validate(&self) -> Result<(), ValidationError> {
        let expected = self.shape.iter().product::<usize>();
        if self.values.len() != expected || !self.values.iter().all(|v| v.is_finite()) {
            return Err(ValidationError);
        }
        Ok(())
    }
}

fn dims(shape: &[usize]) -> String {
    shape
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Writes `layer` to `out` in stream order.
///
/// # Errors
///
/// - [`Error::NotBuilt`] if the layer has not been built
/// - [`Error::Io`] if writing fails
pub fn write_layer<W: Write>(layer: &dyn Layer, out: &mut W) -> Result<()> {
    let kind = layer.kind();
    writeln!(out, "{}", kind.tag())?;
    writeln!(out, "{}", dims(layer.input_shape()?))?;
    writeln!(out, "{}", dims(layer.output_shape()?))?;

    match kind {
        LayerKind::Dense | LayerKind::Conv => {
            let t = layer
                .as_trainable()
                .ok_or_else(|| Error::unsupported(format!("{kind} layer has no parameters")))?;
            writeln!(out, "{}", t.activation().tag())?;
            writeln!(out, "{}", t.has_bias())?;
            if kind == LayerKind::Conv {
                let g = geometry(layer)?;
                writeln!(
                    out,
                    "{} {} {} {}",
                    g.window[0], g.window[1], g.stride[0], g.stride[1]
                )?;
            }
            for v in t.kernel()?.iter() {
                writeln!(out, "{v:?}")?;
            }
            if let Some(bias) = t.bias()? {
                for v in bias.iter() {
                    writeln!(out, "{v:?}")?;
                }
            }
        }
        LayerKind::MaxPool | LayerKind::AvgPool => {
            let g = geometry(layer)?;
            writeln!(out, "{}", dims(&g.window))?;
            writeln!(out, "{}", dims(&g.stride))?;
        }
        LayerKind::Flatten => {}
    }
    Ok(())
}

fn geometry(layer: &dyn Layer) -> Result<crate::layers::Geometry> {
    layer
        .geometry()
        .ok_or_else(|| Error::unsupported(format!("{} layer has no window", layer.kind())))
}

/// Reads the next line, trimmed. `None` at end of stream.
fn try_line<R: BufRead>(input: &mut R) -> Result<Option<String>> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_owned()))
}

fn next_line<R: BufRead>(input: &mut R, what: &str) -> Result<String> {
    try_line(input)?
        .ok_or_else(|| Error::persistence(format!("stream ended before the {what}")))
}

fn parse_dims(line: &str, what: &str) -> Result<Vec<usize>> {
    let shape = line
        .split_whitespace()
        .map(str::parse)
        .collect::<Result<Vec<usize>, _>>()
        .map_err(|_| Error::persistence(format!("bad {what} `{line}`")))?;
    if shape.is_empty() || shape.contains(&0) {
        return Err(Error::persistence(format!("bad {what} `{line}`")));
    }
    Ok(shape)
}

fn parse_pair(line: &str, what: &str) -> Result<[usize; 2]> {
    let values = parse_dims(line, what)?;
    match values[..] {
        [a, b] => Ok([a, b]),
        _ => Err(Error::persistence(format!("{what} needs two values, got `{line}`"))),
    }
}

fn read_activation<R: BufRead>(input: &mut R) -> Result<Activation> {
    let tag = next_line(input, "activation")?;
    Activation::from_tag(&tag).map_err(|e| Error::persistence(e.to_string()))
}

fn read_bias_flag<R: BufRead>(input: &mut R) -> Result<bool> {
    let line = next_line(input, "bias flag")?;
    line.parse()
        .map_err(|_| Error::persistence(format!("bad bias flag `{line}`")))
}

/// Reads `shape.iter().product()` scalars and validates the block.
fn read_param<R: BufRead>(input: &mut R, shape: &[usize], what: &str) -> Result<Vec<f64>> {
    let expected: usize = shape.iter().product();
    let mut values = Vec::with_capacity(expected);
    while values.len() < expected {
        let Some(line) = try_line(input)? else { break };
        let v = line
            .parse::<f64>()
            .map_err(|_| Error::persistence(format!("bad {what} value `{line}`")))?;
        values.push(v);
    }

    let got = values.len();
    let record = ParamRecord {
        shape: shape.to_vec(),
        values,
    };
    let trusted = TrustedData::new(record).map_err(|_| {
        Error::persistence(format!(
            "{what} needs {expected} finite values, stream held {got}"
        ))
    })?;
    Ok(trusted.into_inner().values)
}

/// Reads one layer written by [`write_layer`] and returns it built, with
/// its parameters loaded.
///
/// # Errors
///
/// - [`Error::Persistence`] on any malformed, truncated or inconsistent
///   item
/// - [`Error::Io`] if reading fails
pub fn read_layer<R: BufRead>(input: &mut R) -> Result<Box<dyn Layer>> {
    let tag = next_line(input, "layer kind")?;
    let kind = LayerKind::from_tag(&tag)
        .ok_or_else(|| Error::persistence(format!("unknown layer kind `{tag}`")))?;
    let input_shape = parse_dims(&next_line(input, "input shape")?, "input shape")?;
    let output_shape = parse_dims(&next_line(input, "output shape")?, "output shape")?;

    let rebuild = |e: Error| Error::persistence(format!("cannot rebuild {kind} layer: {e}"));
    let mut layer: Box<dyn Layer> = match kind {
        LayerKind::Dense => {
            let activation = read_activation(input)?;
            let bias = read_bias_flag(input)?;
            let units = output_shape.last().copied().unwrap_or_default();
            Box::new(Dense::new(units, activation).map_err(rebuild)?.with_bias(bias))
        }
        LayerKind::Conv => {
            let activation = read_activation(input)?;
            let bias = read_bias_flag(input)?;
            let line = next_line(input, "convolution geometry")?;
            let geo = parse_dims(&line, "convolution geometry")?;
            let [kh, kw, sh, sw] = geo[..] else {
                return Err(Error::persistence(format!(
                    "convolution geometry needs four values, got `{line}`"
                )));
            };
            let conv = Conv::new(output_shape[0], [kh, kw], activation)
                .and_then(|c| c.with_stride([sh, sw]))
                .map_err(rebuild)?;
            Box::new(conv.with_bias(bias))
        }
        LayerKind::MaxPool => {
            let window = parse_pair(&next_line(input, "pool window")?, "pool window")?;
            let stride = parse_pair(&next_line(input, "pool stride")?, "pool stride")?;
            Box::new(
                MaxPool::new(window)
                    .and_then(|p| p.with_stride(stride))
                    .map_err(rebuild)?,
            )
        }
        LayerKind::AvgPool => {
            let window = parse_pair(&next_line(input, "pool window")?, "pool window")?;
            let stride = parse_pair(&next_line(input, "pool stride")?, "pool stride")?;
            Box::new(
                AvgPool::new(window)
                    .and_then(|p| p.with_stride(stride))
                    .map_err(rebuild)?,
            )
        }
        LayerKind::Flatten => Box::new(Flatten::new()),
    };

    layer.build(&input_shape).map_err(rebuild)?;
    if layer.output_shape()? != output_shape.as_slice() {
        return Err(Error::persistence(format!(
            "{kind} layer on {input_shape:?} produces {:?}, stream says {output_shape:?}",
            layer.output_shape()?
        )));
    }

    if let Some(t) = layer.as_trainable_mut() {
        let kernel_shape = t.kernel()?.shape().to_vec();
        let kernel = read_param(input, &kernel_shape, "kernel")?;
        t.load_kernel(&kernel)?;
        if let Some(bias_shape) = t.bias()?.map(|b| b.shape().to_vec()) {
            let bias = read_param(input, &bias_shape, "bias")?;
            t.load_bias(&bias)?;
        }
    }
    Ok(layer)
}

/// Writes a header, the layer count and every layer of `model`.
///
/// # Errors
///
/// As [`write_layer`].
pub fn write_model<W: Write>(model: &Sequential, out: &mut W) -> Result<()> {
    writeln!(out, "{MODEL_HEADER}")?;
    writeln!(out, "{}", model.len())?;
    for layer in model.layers() {
        write_layer(&**layer, out)?;
    }
    Ok(())
}

/// Reads a model written by [`write_model`].
///
/// The returned model has built layers with loaded parameters and can run
/// forward passes right away. Training needs a
/// [`Sequential::compile`], which keeps the loaded parameters.
///
/// # Errors
///
/// As [`read_layer`], plus [`Error::Persistence`] on a bad header.
pub fn read_model<R: BufRead>(input: &mut R) -> Result<Sequential> {
    let header = next_line(input, "header")?;
    if header != MODEL_HEADER {
        return Err(Error::persistence(format!("bad header `{header}`")));
    }
    let count_line = next_line(input, "layer count")?;
    let count: usize = count_line
        .parse()
        .map_err(|_| Error::persistence(format!("bad layer count `{count_line}`")))?;

    let mut model = Sequential::new();
    for id in 0..count {
        let mut layer = read_layer(input)?;
        layer.set_id(id);
        model.push(layer);
    }
    log::debug!("read {count} layers ({} parameters)", model.num_params());
    Ok(model)
}

/// Saves `model` to the file at `path`.
///
/// # Errors
///
/// As [`write_model`].
pub fn save_model(path: impl AsRef<Path>, model: &Sequential) -> Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    write_model(model, &mut file)?;
    file.flush()?;
    Ok(())
}

/// Loads a model saved by [`save_model`].
///
/// # Errors
///
/// As [`read_model`].
pub fn load_model(path: impl AsRef<Path>) -> Result<Sequential> {
    let mut file = BufReader::new(File::open(path)?);
    read_model(&mut file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::Trainable;
    use crate::tensor;

    fn dense() -> Dense {
        let mut d = Dense::new(2, Activation::LeakyReLU(0.1)).unwrap();
        d.build(&[2]).unwrap();
        d.load_kernel(&[0.1, -0.2, 1.0 / 3.0, 4e-300]).unwrap();
        d.load_bias(&[0.5, -0.5]).unwrap();
        d
    }

    #[test]
    fn dense_stream_order() {
        let mut buf = Vec::new();
        write_layer(&dense(), &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        let third = format!("{:?}", 1.0f64 / 3.0);
        assert_eq!(
            lines,
            vec![
                "dense",
                "2",
                "2",
                "leaky_relu:0.1",
                "true",
                "0.1",
                "-0.2",
                third.as_str(),
                "4e-300",
                "0.5",
                "-0.5",
            ]
        );
    }

    #[test]
    fn conv_roundtrip_is_bit_exact() {
        let mut c = Conv::new(2, [2, 2], Activation::Tanh)
            .unwrap()
            .with_stride([1, 2])
            .unwrap();
        c.build(&[1, 3, 4]).unwrap();
        let kernel: Vec<f64> = (0..8).map(|i| f64::from(i).sin() / 7.0).collect();
        c.load_kernel(&kernel).unwrap();

        let mut buf = Vec::new();
        write_layer(&c, &mut buf).unwrap();
        let back = read_layer(&mut buf.as_slice()).unwrap();

        assert_eq!(back.kind(), LayerKind::Conv);
        assert_eq!(back.geometry(), c.geometry());
        let t = back.as_trainable().unwrap();
        let bits = |v: Vec<f64>| v.into_iter().map(f64::to_bits).collect::<Vec<_>>();
        assert_eq!(bits(t.kernel().unwrap().to_vec()), bits(kernel));
        assert_eq!(t.activation(), Activation::Tanh);
    }

    #[test]
    fn pooling_and_flatten_roundtrip() {
        let mut p = MaxPool::new([2, 2]).unwrap().with_stride([1, 1]).unwrap();
        p.build(&[1, 3, 3]).unwrap();
        let mut f = Flatten::new();
        f.build(&[1, 2, 2]).unwrap();

        let mut buf = Vec::new();
        write_layer(&p, &mut buf).unwrap();
        write_layer(&f, &mut buf).unwrap();
        let mut input = buf.as_slice();
        let p2 = read_layer(&mut input).unwrap();
        let f2 = read_layer(&mut input).unwrap();
        assert_eq!(p2.geometry(), p.geometry());
        assert_eq!(p2.output_shape().unwrap(), &[1, 2, 2]);
        assert_eq!(f2.output_shape().unwrap(), &[1, 4]);
        assert!(input.is_empty());
    }

    #[test]
    fn truncated_stream_is_rejected() {
        let mut buf = Vec::new();
        write_layer(&dense(), &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let cut: String = text.lines().take(7).map(|l| format!("{l}\n")).collect();
        assert!(matches!(
            read_layer(&mut cut.as_bytes()),
            Err(Error::Persistence(_))
        ));
    }

    #[test]
    fn inconsistent_shapes_are_rejected() {
        let stream = "dense\n3\n4 4\nrelu\nfalse\n";
        assert!(matches!(
            read_layer(&mut stream.as_bytes()),
            Err(Error::Persistence(_))
        ));
        assert!(matches!(
            read_layer(&mut "lstm\n1\n1\n".as_bytes()),
            Err(Error::Persistence(_))
        ));
    }

    #[test]
    fn loaded_model_predicts_like_the_original() {
        let mut model = Sequential::new();
        model.add(dense());
        let x = tensor!([1.0, -2.0]);
        let mut buf = Vec::new();
        write_model(&model, &mut buf).unwrap();

        let mut back = read_model(&mut buf.as_slice()).unwrap();
        assert_eq!(back.len(), 1);
        let expected = {
            let mut d = dense();
            d.forward(&x).unwrap().to_vec()
        };
        assert_eq!(back.forward(&x).unwrap().to_vec(), expected);
    }
}
