//! Operation catalogue: wire ids, names, and declared arities.
//!
//! Each operation carries a stable `u32` wire id and fixed argument-count
//! bounds. The catalogue is the single source of truth: dispatch, the arity
//! check, and the test suites all read it from here.

use crate::args::Arity;
use crate::error::{DeviceError, Result};

macro_rules! catalogue {
    ($( $(#[$meta:meta])* $name:ident = $id:literal, $arity:expr; )+) => {
        /// One entry per operation in the dispatch catalogue.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Op {
            $( $(#[$meta])* $name, )+
        }

        impl Op {
            /// Every operation, in catalogue order.
            pub const ALL: &'static [Op] = &[ $( Op::$name, )+ ];

            /// Stable wire id.
            #[must_use]
            pub fn id(self) -> u32 {
                match self { $( Op::$name => $id, )+ }
            }

            /// Resolve a wire id.
            ///
            /// # Errors
            ///
            /// `UnknownOp` for ids outside the catalogue.
            pub fn from_id(id: u32) -> Result<Op> {
                match id {
                    $( $id => Ok(Op::$name), )+
                    other => Err(DeviceError::UnknownOp(other)),
                }
            }

            /// Declared argument-count bounds.
            #[must_use]
            pub fn arity(self) -> Arity {
                match self { $( Op::$name => $arity, )+ }
            }

            /// Catalogue name.
            #[must_use]
            pub fn name(self) -> &'static str {
                match self { $( Op::$name => stringify!($name), )+ }
            }
        }
    };
}

catalogue! {
    // --- Device / runtime control ---
    /// Select the current device; optional init flags and seed.
    SetDevice = 1, Arity::range(1, 3);
    /// Current device ordinal.
    GetDevice = 2, Arity::NONE;
    /// Reset the current device.
    ResetDevice = 3, Arity::NONE;
    /// Block until device work completes.
    SynchronizeDevice = 4, Arity::NONE;
    /// Numeric device property by id.
    GetDeviceProperty = 5, Arity::exact(2);
    /// Whether two data handles sit on their claimed devices.
    CheckMemoryAttributes = 6, Arity::exact(4);
    /// Memory totals for a device.
    GetDeviceMemory = 7, Arity::exact(1);
    /// Peer-access capability between two devices.
    CanAccessPeer = 8, Arity::exact(2);
    /// Enable peer access to a device.
    EnablePeerAccess = 9, Arity::exact(1);
    /// Disable peer access to a device.
    DisablePeerAccess = 10, Arity::exact(1);
    /// Seed the kernel RNG.
    SetRandomSeed = 11, Arity::exact(1);

    // --- Memory and resource lifecycle ---
    /// Allocate a device buffer, optionally copying a host buffer in.
    AllocMemory = 30, Arity::range(1, 2);
    /// Free a device buffer.
    FreeMemory = 31, Arity::exact(1);
    /// Read buffer contents.
    GetMemory = 32, Arity::range(1, 2);
    /// Write buffer contents.
    SetMemory = 33, Arity::at_least(2);
    /// Write buffer contents at an offset.
    SetMemoryAt = 34, Arity::at_least(3);
    /// Allocate a host buffer.
    AllocHostBuffer = 35, Arity::exact(1);
    /// Free a host buffer.
    FreeHostBuffer = 36, Arity::exact(1);
    /// Read host buffer contents.
    GetHostMemory = 37, Arity::exact(1);
    /// Write host buffer contents.
    SetHostMemory = 38, Arity::at_least(2);
    /// Create an aliasing view into a buffer.
    CreateMemoryPointer = 39, Arity::exact(3);
    /// Free a buffer view.
    FreeMemoryPointer = 40, Arity::exact(1);
    /// Create a stream, optionally non-blocking.
    CreateStream = 41, Arity::range(0, 1);
    /// Free a stream.
    FreeStream = 42, Arity::exact(1);
    /// Wait on a stream.
    SynchronizeStream = 43, Arity::exact(1);
    /// Wait on the calling thread's queued work.
    SynchronizeThread = 44, Arity::NONE;
    /// Allocate a memory-test session.
    CreateMemoryTest = 45, Arity::exact(1);
    /// Free a memory-test session.
    FreeMemoryTest = 46, Arity::exact(1);
    /// Run memory-test phases over a block range.
    RunMemoryTest = 47, Arity::exact(6);

    // --- dnn contexts, descriptors, descriptor-driven ops ---
    /// Create a dnn context, optionally bound to a stream.
    CreateCudnn = 80, Arity::range(0, 1);
    /// Free a dnn context.
    FreeCudnn = 81, Arity::exact(1);
    /// Create a tensor descriptor.
    CreateTensorDesc = 82, Arity::NONE;
    /// Free a tensor descriptor.
    FreeTensorDesc = 83, Arity::exact(1);
    /// Configure a tensor descriptor (n,c,h,w[, explicit strides]).
    SetTensorDesc = 84, Arity::either(5, 9);
    /// y = alpha * x + beta * y over matching tensor descriptors.
    AddTensor = 85, Arity::exact(9);
    /// Create a filter descriptor.
    CreateFilterDesc = 86, Arity::NONE;
    /// Free a filter descriptor.
    FreeFilterDesc = 87, Arity::exact(1);
    /// Configure a filter descriptor (k,c,h,w).
    SetFilterDesc = 88, Arity::exact(5);
    /// Create a convolution descriptor.
    CreateConvDesc = 89, Arity::NONE;
    /// Free a convolution descriptor.
    FreeConvDesc = 90, Arity::exact(1);
    /// Configure a convolution descriptor (pad, stride).
    SetConvDesc = 91, Arity::exact(5);
    /// Algorithm and workspace query for a convolution setup.
    GetConvInfo = 92, Arity::exact(6);
    /// Convolution forward.
    ConvForward = 93, Arity::exact(17);
    /// Convolution backward, bias gradient.
    ConvBackwardBias = 94, Arity::exact(9);
    /// Convolution backward, filter gradient.
    ConvBackwardFilter = 95, Arity::exact(17);
    /// Convolution backward, data gradient.
    ConvBackwardData = 96, Arity::exact(17);
    /// Create a pooling descriptor.
    CreatePoolingDesc = 97, Arity::NONE;
    /// Free a pooling descriptor.
    FreePoolingDesc = 98, Arity::exact(1);
    /// Configure a pooling descriptor (method, window, pad, stride).
    SetPoolingDesc = 99, Arity::exact(8);
    /// Pooling forward.
    PoolingForward = 100, Arity::exact(8);
    /// Pooling backward.
    PoolingBackward = 101, Arity::exact(12);
    /// Create a dropout descriptor.
    CreateDropoutDesc = 102, Arity::NONE;
    /// Free a dropout descriptor.
    FreeDropoutDesc = 103, Arity::exact(1);
    /// Configure a dropout descriptor (ratio, states, seed).
    SetDropoutDesc = 104, Arity::exact(5);
    /// State and reserve sizes for a dropout setup.
    GetDropoutInfo = 105, Arity::exact(2);
    /// Dropout forward.
    DropoutForward = 106, Arity::exact(7);
    /// Dropout backward.
    DropoutBackward = 107, Arity::exact(7);
    /// Create an LRN descriptor.
    CreateLrnDesc = 108, Arity::NONE;
    /// Free an LRN descriptor.
    FreeLrnDesc = 109, Arity::exact(1);
    /// Configure an LRN descriptor (size, alpha, beta, k).
    SetLrnDesc = 110, Arity::exact(5);
    /// Tanh activation forward.
    TanhForward = 111, Arity::exact(7);
    /// Tanh activation backward.
    TanhBackward = 112, Arity::exact(11);
    /// Sigmoid activation forward.
    SigmoidForward = 113, Arity::exact(7);
    /// Sigmoid activation backward.
    SigmoidBackward = 114, Arity::exact(11);
    /// ReLU activation forward.
    ReluForward = 115, Arity::exact(7);
    /// ReLU activation backward.
    ReluBackward = 116, Arity::exact(11);
    /// Channel softmax forward.
    SoftmaxForward = 117, Arity::exact(7);
    /// Channel softmax backward.
    SoftmaxBackward = 118, Arity::exact(9);
    /// Cross-channel LRN forward.
    LrnForwardCC = 119, Arity::exact(8);
    /// Cross-channel LRN backward.
    LrnBackwardCC = 120, Arity::exact(12);
    /// Cross-channel local contrast normalization forward.
    LcnForwardCC = 121, Arity::exact(10);
    /// Cross-channel local contrast normalization backward.
    LcnBackwardCC = 122, Arity::exact(11);

    // --- Collective communication ---
    /// Create a communicator (gpu, count, rank, guid quintuple).
    CreateNccl = 160, Arity::exact(9);
    /// Free a communicator.
    FreeNccl = 161, Arity::exact(1);
    /// Bind same-process communicators into one group.
    NcclInitSingleProcess = 162, Arity::at_least(4);
    /// Join a cross-process group through the rendezvous key.
    NcclInitMultiProcess = 163, Arity::exact(2);
    /// Broadcast from rank 0 across the group.
    NcclBroadcast = 164, Arity::exact(4);
    /// All-reduce across the group with op and scale.
    NcclAllReduce = 165, Arity::exact(6);

    // --- Solver instances ---
    /// Create a PCA solver (iterations, m, n, k, data/result handles).
    CreatePca = 180, Arity::range(7, 9);
    /// Free a PCA solver.
    FreePca = 181, Arity::exact(1);
    /// Advance a PCA solver by up to `steps` iterations.
    RunPca = 182, Arity::range(1, 2);
    /// Create a gaussian-perplexity search over a neighbour set.
    CreateTsneGaussianPerplexity = 183, Arity::exact(9);
    /// Free a gaussian-perplexity search.
    FreeTsneGaussianPerplexity = 184, Arity::exact(1);
    /// Advance the perplexity search by one point.
    FindTsneGaussianPerplexity = 185, Arity::exact(1);
    /// Create a t-SNE gradient solver.
    CreateTsne = 186, Arity::exact(8);
    /// Free a t-SNE gradient solver.
    FreeTsne = 187, Arity::exact(1);
    /// Compute the current t-SNE gradient into the solver's dC buffer.
    ComputeTsneGradient = 188, Arity::exact(2);
    /// KL error of the current embedding.
    EvaluateTsneError = 189, Arity::exact(1);

    // --- Math kernels: elementwise / BLAS-style / reductions ---
    /// Fill (or poke one element of) a buffer.
    Set = 220, Arity::range(3, 5);
    /// Read a buffer (or one element of it).
    Get = 221, Arity::range(2, 3);
    /// Copy between buffers, optionally via a stream.
    Copy = 222, Arity::range(3, 6);
    /// C = alpha * op(A) * op(B) + beta * C.
    Gemm = 223, Arity::range(10, 13);
    /// Gemm with explicit leading dimensions.
    Gemm2 = 224, Arity::exact(13);
    /// y = alpha * op(A) * x + beta * y.
    Gemv = 225, Arity::range(8, 11);
    /// y += alpha * x.
    Axpy = 226, Arity::range(4, 6);
    /// y = alpha * x + beta * y.
    Axpby = 227, Arity::exact(5);
    /// x *= alpha.
    Scal = 228, Arity::range(3, 4);
    /// Inner product.
    Dot = 229, Arity::range(3, 5);
    /// Sum of absolute values.
    Asum = 230, Arity::range(2, 3);
    /// y = alpha * x.
    Scale = 231, Arity::range(4, 6);
    /// y += alpha.
    AddScalar = 232, Arity::range(3, 4);
    /// y = a + b.
    Add = 233, Arity::exact(4);
    /// y = alphaA * a + alphaB * b.
    Add2 = 234, Arity::exact(6);
    /// y = a - b.
    Sub = 235, Arity::exact(4);
    /// y = a * b.
    Mul = 236, Arity::exact(4);
    /// y *= alpha.
    MulScalar = 237, Arity::exact(3);
    /// y = a / b.
    Div = 238, Arity::exact(4);
    /// y = a - b, returning sum of squares of y.
    SubAndDot = 239, Arity::exact(4);
    /// y = |x|.
    Abs = 240, Arity::exact(3);
    /// y = exp(x).
    Exp = 241, Arity::exact(3);
    /// y = ln(x).
    Log = 242, Arity::exact(3);
    /// y = x ^ alpha.
    Powx = 243, Arity::exact(4);
    /// y = sign(x).
    Sign = 244, Arity::exact(3);
    /// y = sqrt(x).
    Sqrt = 245, Arity::exact(3);
    /// y = 1 / x.
    Reciprocol = 246, Arity::exact(3);
    /// Student-t kernel 1 / (1 + x).
    Student = 247, Arity::exact(3);
    /// Logistic 1 / (1 + exp(-x)).
    Logistic1 = 248, Arity::exact(3);
    /// Steep logistic 1 / (1 + exp(-2x)).
    Logistic2 = 249, Arity::exact(3);
    /// y = 1 where a and b share sign, else 0.
    CompareSigns = 250, Arity::exact(4);
    /// Maximum element.
    MaxVal = 251, Arity::range(2, 3);
    /// Minimum element.
    MinVal = 252, Arity::range(2, 3);
    /// Minimum and maximum in one pass.
    MinMaxVal = 253, Arity::range(2, 3);
    /// Sum of squares (work buffer first).
    SumSq = 254, Arity::range(3, 4);
    /// Sum of squared differences (work buffer first).
    SumSqDiff = 255, Arity::range(4, 6);
    /// width = alpha-weighted span between min and max around the mean.
    Width = 256, Arity::exact(6);
    /// Count of points outside mean +- width.
    ContainsPoint = 257, Arity::exact(5);
    /// Replace NaN/Inf with a constant.
    Denan = 258, Arity::exact(3);
    /// Per-position max over channels.
    ChannelMax = 260, Arity::exact(6);
    /// Subtract a per-position value across channels, in place.
    ChannelSub = 261, Arity::exact(6);
    /// Per-position sum over channels.
    ChannelSum = 262, Arity::exact(6);
    /// Divide by a per-position value across channels, in place.
    ChannelDiv = 263, Arity::exact(6);
    /// Multiply by a per-position value across channels, in place.
    ChannelMul = 264, Arity::exact(6);
    /// Per-position dot product over channels.
    ChannelDot = 265, Arity::exact(7);
    /// Image-to-column unrolling.
    Im2Col = 270, Arity::exact(15);
    /// N-dimensional image-to-column unrolling.
    Im2ColNd = 271, Arity::exact(12);
    /// Column-to-image accumulation.
    Col2Im = 272, Arity::exact(15);
    /// N-dimensional column-to-image accumulation.
    Col2ImNd = 273, Arity::exact(12);
    /// Seed the fill RNG.
    RngSetSeed = 280, Arity::exact(1);
    /// Uniform fill over [min, max).
    RngUniform = 281, Arity::exact(4);
    /// Gaussian fill.
    RngGaussian = 282, Arity::exact(4);
    /// Bernoulli 0/1 fill.
    RngBernoulli = 283, Arity::exact(3);

    // --- Math kernels: per-layer forward/backward ---
    /// Batch reindex forward.
    BatchReidxFwd = 290, Arity::exact(5);
    /// Batch reindex backward.
    BatchReidxBwd = 291, Arity::exact(7);
    /// Embedding lookup forward.
    EmbedFwd = 292, Arity::exact(7);
    /// Embedding gradient scatter.
    EmbedBwd = 293, Arity::exact(7);
    /// Raw pooling forward with mask outputs.
    PoolingFwd = 294, Arity::exact(18);
    /// Raw pooling backward.
    PoolingBwd = 295, Arity::exact(18);
    /// Unpooling forward through a mask.
    UnpoolingFwd = 296, Arity::exact(17);
    /// Unpooling backward through a mask.
    UnpoolingBwd = 297, Arity::exact(17);
    /// Elementwise tanh forward.
    TanhFwd = 298, Arity::exact(3);
    /// Elementwise tanh backward.
    TanhBwd = 299, Arity::exact(4);
    /// Elementwise sigmoid forward.
    SigmoidFwd = 300, Arity::exact(3);
    /// Elementwise sigmoid backward.
    SigmoidBwd = 301, Arity::exact(4);
    /// Leaky ReLU forward.
    ReluFwd = 302, Arity::exact(4);
    /// Leaky ReLU backward.
    ReluBwd = 303, Arity::exact(5);
    /// ELU forward.
    EluFwd = 304, Arity::exact(4);
    /// ELU backward.
    EluBwd = 305, Arity::exact(6);
    /// Mask-threshold dropout forward.
    DropoutFwd = 306, Arity::exact(6);
    /// Mask-threshold dropout backward.
    DropoutBwd = 307, Arity::exact(6);
    /// BNLL forward ln(1 + exp(x)).
    BnllFwd = 308, Arity::exact(3);
    /// BNLL backward.
    BnllBwd = 309, Arity::exact(4);
    /// PReLU forward with per-channel slopes.
    PreluFwd = 310, Arity::exact(7);
    /// PReLU data gradient.
    PreluBwd = 311, Arity::exact(8);
    /// PReLU slope gradient accumulation.
    PreluBwdParam = 312, Arity::exact(6);
    /// Softmax loss forward with optional ignore label.
    SoftmaxLossFwd = 313, Arity::range(8, 9);
    /// Softmax loss backward with optional ignore label.
    SoftmaxLossBwd = 314, Arity::range(8, 9);
    /// Elementwise max against a second input, recording winners.
    MaxFwd = 315, Arity::exact(6);
    /// Route gradient to recorded winners.
    MaxBwd = 316, Arity::exact(5);
    /// Strided crop forward.
    CropFwd = 317, Arity::exact(7);
    /// Strided crop backward.
    CropBwd = 318, Arity::exact(7);
    /// Concatenation forward along an axis.
    ConcatFwd = 319, Arity::exact(8);
    /// Concatenation backward along an axis.
    ConcatBwd = 320, Arity::exact(8);
    /// Slice forward along an axis.
    SliceFwd = 321, Arity::exact(8);
    /// Slice backward along an axis.
    SliceBwd = 322, Arity::exact(8);
    /// Tile forward.
    TileFwd = 323, Arity::exact(6);
    /// Tile backward (sum over tiles).
    TileBwd = 324, Arity::exact(6);
    /// Broadcast bias add.
    BiasFwd = 325, Arity::exact(6);
    /// Broadcast scale, optionally fused with bias.
    ScaleFwd = 326, Arity::range(6, 7);
    /// Step threshold.
    ThresholdFwd = 327, Arity::exact(4);
    /// Contrastive loss backward.
    CllBwd = 328, Arity::exact(9);
    /// LRN scale accumulation pass.
    LrnFillScale = 329, Arity::exact(10);
    /// LRN output from data and scale.
    LrnComputeOutput = 330, Arity::exact(5);
    /// LRN gradient pass.
    LrnComputeDiff = 331, Arity::exact(13);
    /// Recurrent LSTM step forward.
    LstmFwd = 332, Arity::exact(20);
    /// Recurrent LSTM step backward.
    LstmBwd = 333, Arity::exact(24);
    /// LSTM unit forward (gates precomputed).
    LstmUnitFwd = 334, Arity::exact(9);
    /// LSTM unit backward.
    LstmUnitBwd = 335, Arity::exact(13);
    /// Coefficient-weighted sum forward.
    CoeffSumFwd = 336, Arity::exact(7);
    /// Coefficient-weighted sum backward.
    CoeffSumBwd = 337, Arity::exact(7);
    /// Sigmoid cross-entropy loss forward.
    SigmoidCrossEntropyFwd = 338, Arity::exact(7);
    /// Zero loss gradient at ignored labels.
    SigmoidCrossEntropyIgnore = 339, Arity::exact(4);

    // --- Math kernels: optimizer updates ---
    /// SGD with momentum history.
    SgdUpdate = 350, Arity::exact(5);
    /// Nesterov momentum update.
    NesterovUpdate = 351, Arity::exact(5);
    /// Adagrad update.
    AdagradUpdate = 352, Arity::exact(5);
    /// Adadelta update.
    AdadeltaUpdate = 353, Arity::exact(7);
    /// Adam update.
    AdamUpdate = 354, Arity::exact(8);
    /// RMSProp update.
    RmsPropUpdate = 355, Arity::exact(6);

    // --- Math kernels: matrix utilities and distances ---
    /// Blend original/updated/server data by percentage.
    CombineData = 360, Arity::exact(7);
    /// Set the main diagonal to a constant.
    MtxSetDiagonal = 361, Arity::exact(4);
    /// Scale the matrix and add a scaled diagonal vector.
    MtxSetDiagonal2 = 362, Arity::exact(6);
    /// Add a row or column vector across a matrix.
    MtxAddVector = 363, Arity::exact(7);
    /// Combine A with B-transposed under an elementwise op.
    MtxTransposeOp = 364, Arity::range(6, 8);
    /// Reduce each column under an aggregation op.
    MtxAggregateCols = 365, Arity::exact(5);
    /// Reduce each row under an aggregation op.
    MtxAggregateRows = 366, Arity::exact(6);
    /// Matrix transpose.
    MtxTranspose = 367, Arity::exact(4);
    /// Subtract per-column means, optionally normalizing by the span.
    MtxMeanCenterByColumn = 368, Arity::range(5, 6);
    /// Pairwise squared euclidean distances for a row range.
    MtxEuclideanDist = 369, Arity::exact(7);
    /// Plain row-major matrix product.
    MtxDot = 370, Arity::exact(6);

    // --- Math kernels: t-SNE internals ---
    /// Gradient-descent update with per-dimension gains.
    TsneUpdate = 380, Arity::range(7, 9);
    /// Gradient from positive/negative force buffers.
    TsneUpdateGrad = 381, Arity::exact(5);
    /// Exact KL error between P and Q.
    TsneComputeExactError = 382, Arity::exact(4);
    /// Pairwise squared euclidean distance matrix.
    TsneComputeSquaredEuclideanDistance = 383, Arity::exact(4);
    /// Student-t Q matrix from distances, returning the normalizer.
    TsneComputeQMatrix = 384, Arity::exact(4);
    /// Exact KL gradient.
    TsneComputeExactGradient = 385, Arity::exact(7);
    /// Symmetrize a sparse affinity matrix, returning its size.
    TsneSymmetrizeMatrix = 386, Arity::exact(4);
    /// Bounding box holding a percentage of embedded points.
    TsneComputeKnnBounds = 387, Arity::exact(3);

    // --- Math kernels: misc image/distance ---
    /// Per-channel gaussian blur.
    GaussianBlur = 390, Arity::exact(7);
    /// Thresholded hamming difference.
    HammingDiff = 391, Arity::range(5, 8);
    /// Batched pairwise distances over an index list.
    CalcBatchDist = 392, Arity::at_least(7);
}

/// String-returning device queries, dispatched on a separate typed channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextQuery {
    /// Device name.
    DeviceName,
    /// Peer-to-peer capability summary.
    DeviceP2PInfo,
    /// Device information line, optionally verbose.
    DeviceInfo,
}

impl TextQuery {
    /// Declared argument-count bounds for the query.
    #[must_use]
    pub fn arity(self) -> Arity {
        match self {
            TextQuery::DeviceName | TextQuery::DeviceP2PInfo => Arity::exact(1),
            TextQuery::DeviceInfo => Arity::range(1, 2),
        }
    }
}
