//! Test suite for the connection arena and the BiDi bridge.

mod support;
