pub mod hpke;
