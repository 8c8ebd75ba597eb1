//! Built-in allowlist and denylist for the bundled model collection.

/// Modules whose members may be resolved, subject to the denylist.
pub const SAFE_MODULES: &[&str] = &[
    "numpy",
    "numpy.core.multiarray",
    "numpy.core.numeric",
    "numpy._core.multiarray",
    "numpy._core.numeric",
    "scipy.sparse",
    "scipy.sparse._csr",
    "scipy.sparse.csr",
    "collections",
    "builtins",
    "madmom.ml.nn",
    "madmom.ml.nn.layers",
    "madmom.ml.nn.activations",
    "madmom.ml.hmm",
    "madmom.ml.crf",
    "madmom.features.beats_hmm",
];

/// Fully qualified names admitted without consulting the module rule.
pub const SAFE_QUALIFIED_NAMES: &[&str] = &[
    // NumPy
    "numpy.ndarray",
    "numpy.dtype",
    "numpy.core.multiarray._reconstruct",
    "numpy.core.multiarray.scalar",
    "numpy._core.multiarray._reconstruct",
    "numpy._core.multiarray.scalar",
    // SciPy sparse
    "scipy.sparse._csr.csr_matrix",
    "scipy.sparse.csr.csr_matrix",
    // Builtin containers
    "builtins.dict",
    "builtins.list",
    "builtins.tuple",
    "builtins.set",
    "builtins.frozenset",
    "builtins.bytes",
    "builtins.bytearray",
    "collections.OrderedDict",
    // Layers
    "madmom.ml.nn.layers.FeedForwardLayer",
    "madmom.ml.nn.layers.RecurrentLayer",
    "madmom.ml.nn.layers.BidirectionalLayer",
    "madmom.ml.nn.layers.ConvolutionalLayer",
    "madmom.ml.nn.layers.StrideLayer",
    "madmom.ml.nn.layers.MaxPoolLayer",
    "madmom.ml.nn.layers.BatchNormLayer",
    "madmom.ml.nn.layers.AverageLayer",
    "madmom.ml.nn.layers.LSTMLayer",
    "madmom.ml.nn.layers.GRULayer",
    "madmom.ml.nn.layers.TransposedConvolutionalLayer",
    "madmom.ml.nn.layers.PadLayer",
    // Activations
    "madmom.ml.nn.activations.Activation",
    "madmom.ml.nn.activations.sigmoid",
    "madmom.ml.nn.activations.tanh",
    "madmom.ml.nn.activations.relu",
    "madmom.ml.nn.activations.elu",
    "madmom.ml.nn.activations.softmax",
    "madmom.ml.nn.activations.linear",
];

/// Bare names rejected even inside an allowed module. Compared lowercase.
pub const DANGEROUS_NAMES: &[&str] = &[
    "exec",
    "eval",
    "compile",
    "open",
    "input",
    "__import__",
    "getattr",
    "setattr",
    "delattr",
    "globals",
    "locals",
    "__builtins__",
    "system",
    "popen",
    "subprocess",
    "os",
    "sys",
];
