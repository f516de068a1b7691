//! Cart domain module (event-sourced).
//!
//! One open cart per customer. Cart membership never reserves stock; the
//! availability bound for each line is computed by the caller and passed in as
//! a `limit`, so the aggregate stays pure.

pub mod cart;

pub use cart::{
    AddItem, Cart, CartCleared, CartCommand, CartEvent, CartId, CartLine, CartOpened, CheckOutLines,
    ClearCart, ItemAdded, ItemRemoved, LinesCheckedOut, LinesReturned, QuantityChanged, RemoveItem,
    ReturnLines, UpdateQuantity,
};
