
mod touch;
mod trackball;
