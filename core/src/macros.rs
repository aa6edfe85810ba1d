#[macro_export]
macro_rules! tvec {
    // count helper: transform any expression into 1
    (@one $x:expr) => (1usize);
    ($elem:expr; $n:expr) => ({
        $crate::TVec::from_elem($elem, $n)
    });
    ($($x:expr),*$(,)*) => ({
        let count = 0usize $(+ $crate::tvec!(@one $x))*;
        #[allow(unused_mut)]
        let mut vec = $crate::TVec::new();
        if count <= vec.inline_size() {
            $(vec.push($x);)*
            vec
        } else {
            $crate::TVec::from_vec(vec![$($x,)*])
        }
    });
}

#[macro_export]
macro_rules! args_1 {
    ($inputs:expr) => {{
        if $inputs.len() != 1 {
            $crate::anyhow::bail!("Expected 1 arg, got {}", $inputs.len())
        }
        let mut inputs = $inputs.into_iter();
        inputs.next().unwrap()
    }};
}

#[macro_export]
macro_rules! args_2 {
    ($inputs:expr) => {{
        if $inputs.len() != 2 {
            $crate::anyhow::bail!("Expected 2 args, got {}", $inputs.len())
        }
        let mut inputs = $inputs.into_iter();
        (inputs.next().unwrap(), inputs.next().unwrap())
    }};
}

#[macro_export]
macro_rules! args_5 {
    ($inputs:expr) => {{
        if $inputs.len() != 5 {
            $crate::anyhow::bail!("Expected 5 args, got {}", $inputs.len())
        }
        let mut inputs = $inputs.into_iter();
        (
            inputs.next().unwrap(),
            inputs.next().unwrap(),
            inputs.next().unwrap(),
            inputs.next().unwrap(),
            inputs.next().unwrap(),
        )
    }};
}

/// Implement `children` and `children_mut` of a [`Layer`](crate::nn::Layer)
/// whose children are `Box<dyn Layer>` fields. A field can be exposed under
/// another name with `field as "Name"`.
#[macro_export]
macro_rules! layer_children {
    (@name $field:ident) => { stringify!($field) };
    (@name $field:ident $name:literal) => { $name };
    ($($field:ident $(as $name:literal)?),* $(,)?) => {
        fn children(&self) -> Vec<(String, &dyn $crate::nn::Layer)> {
            vec![$(
                ($crate::layer_children!(@name $field $($name)?).to_string(), &*self.$field)
            ),*]
        }

        fn children_mut(&mut self) -> Vec<(String, &mut Box<dyn $crate::nn::Layer>)> {
            vec![$(
                ($crate::layer_children!(@name $field $($name)?).to_string(), &mut self.$field)
            ),*]
        }
    };
}
