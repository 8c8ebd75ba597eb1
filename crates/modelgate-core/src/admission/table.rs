//! Closed table of constructible types.
//!
//! Resolution never goes through a symbol lookup: an admitted reference is
//! matched against this table and either becomes one of the enumerated kinds
//! or an inert [`AdmittedType::Opaque`] record.

use std::fmt;

use serde::{Serialize, Serializer};

use super::TypeRef;

/// Builtin container and byte types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinType {
    Dict,
    List,
    Tuple,
    Set,
    FrozenSet,
    Bytes,
    ByteArray,
    OrderedDict,
}

/// Numeric array types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrayType {
    NdArray,
    Dtype,
    /// `multiarray._reconstruct`, the ndarray factory used by pickled arrays.
    Reconstruct,
    /// `multiarray.scalar`, a pickled numpy scalar.
    Scalar,
    CsrMatrix,
}

/// Neural network layer classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    FeedForward,
    Recurrent,
    Bidirectional,
    Convolutional,
    Stride,
    MaxPool,
    BatchNorm,
    Average,
    Lstm,
    Gru,
    TransposedConvolutional,
    Pad,
}

/// Activation functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationKind {
    Activation,
    Sigmoid,
    Tanh,
    Relu,
    Elu,
    Softmax,
    Linear,
}

/// Every type kind the decoder knows how to represent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "family", content = "kind", rename_all = "snake_case")]
pub enum KnownType {
    Builtin(BuiltinType),
    Array(ArrayType),
    Layer(LayerKind),
    Activation(ActivationKind),
}

const NUMPY_MULTIARRAY: &[&str] = &["numpy.core.multiarray", "numpy._core.multiarray"];
const SCIPY_CSR: &[&str] = &["scipy.sparse._csr", "scipy.sparse.csr", "scipy.sparse"];
const LAYERS: &str = "madmom.ml.nn.layers";
const ACTIVATIONS: &str = "madmom.ml.nn.activations";

impl KnownType {
    /// Look up `(module, name)` in the table.
    pub fn lookup(module: &str, name: &str) -> Option<Self> {
        if module == "builtins" {
            let builtin = match name {
                "dict" => BuiltinType::Dict,
                "list" => BuiltinType::List,
                "tuple" => BuiltinType::Tuple,
                "set" => BuiltinType::Set,
                "frozenset" => BuiltinType::FrozenSet,
                "bytes" => BuiltinType::Bytes,
                "bytearray" => BuiltinType::ByteArray,
                _ => return None,
            };
            return Some(Self::Builtin(builtin));
        }

        if module == "collections" && name == "OrderedDict" {
            return Some(Self::Builtin(BuiltinType::OrderedDict));
        }

        if module == "numpy" {
            return match name {
                "ndarray" => Some(Self::Array(ArrayType::NdArray)),
                "dtype" => Some(Self::Array(ArrayType::Dtype)),
                _ => None,
            };
        }

        if NUMPY_MULTIARRAY.contains(&module) {
            return match name {
                "_reconstruct" => Some(Self::Array(ArrayType::Reconstruct)),
                "scalar" => Some(Self::Array(ArrayType::Scalar)),
                _ => None,
            };
        }

        if SCIPY_CSR.contains(&module) && name == "csr_matrix" {
            return Some(Self::Array(ArrayType::CsrMatrix));
        }

        if module == LAYERS {
            let layer = match name {
                "FeedForwardLayer" => LayerKind::FeedForward,
                "RecurrentLayer" => LayerKind::Recurrent,
                "BidirectionalLayer" => LayerKind::Bidirectional,
                "ConvolutionalLayer" => LayerKind::Convolutional,
                "StrideLayer" => LayerKind::Stride,
                "MaxPoolLayer" => LayerKind::MaxPool,
                "BatchNormLayer" => LayerKind::BatchNorm,
                "AverageLayer" => LayerKind::Average,
                "LSTMLayer" => LayerKind::Lstm,
                "GRULayer" => LayerKind::Gru,
                "TransposedConvolutionalLayer" => LayerKind::TransposedConvolutional,
                "PadLayer" => LayerKind::Pad,
                _ => return None,
            };
            return Some(Self::Layer(layer));
        }

        if module == ACTIVATIONS {
            let activation = match name {
                "Activation" => ActivationKind::Activation,
                "sigmoid" => ActivationKind::Sigmoid,
                "tanh" => ActivationKind::Tanh,
                "relu" => ActivationKind::Relu,
                "elu" => ActivationKind::Elu,
                "softmax" => ActivationKind::Softmax,
                "linear" => ActivationKind::Linear,
                _ => return None,
            };
            return Some(Self::Activation(activation));
        }

        None
    }
}

/// A type reference that passed admission.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AdmittedType {
    /// Resolved to an entry of the closed table.
    Known { reference: TypeRef, kind: KnownType },

    /// Admitted by module, but unknown to the table. Carries no behaviour.
    Opaque(TypeRef),
}

impl AdmittedType {
    pub(crate) fn resolve(reference: TypeRef) -> Self {
        match KnownType::lookup(&reference.module, &reference.name) {
            Some(kind) => Self::Known { reference, kind },
            None => Self::Opaque(reference),
        }
    }

    pub fn reference(&self) -> &TypeRef {
        match self {
            Self::Known { reference, .. } | Self::Opaque(reference) => reference,
        }
    }

    pub fn kind(&self) -> Option<KnownType> {
        match self {
            Self::Known { kind, .. } => Some(*kind),
            Self::Opaque(_) => None,
        }
    }

    pub fn is_opaque(&self) -> bool {
        matches!(self, Self::Opaque(_))
    }
}

impl fmt::Display for AdmittedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.reference().fmt(f)
    }
}

impl Serialize for AdmittedType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self.reference())
    }
}
